fn format_album_listing(personal: &[String], shared: &[String]) -> String {
    let mut out = String::new();
    for (heading, names) in [("mine", personal), ("shared", shared)] {
        out.push_str(heading);
        out.push_str(":\n");
        if names.is_empty() {
            out.push_str("  (none)\n");
        }
        for name in names {
            out.push_str("  ");
            out.push_str(name);
            out.push('\n');
        }
    }
    out
}

fn require_var<F>(lookup: &F, name: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_dir(home: &Path) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home.join(".local/share"))
        .join(DATA_DIR_NAME)
}

fn read_u64_var<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_var<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

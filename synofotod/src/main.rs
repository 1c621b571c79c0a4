use synofotod::daemon::{DaemonConfig, DaemonRuntime};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    ListAlbums,
    Album(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--list-albums" => mode = CliMode::ListAlbums,
            "--album" => match args.next() {
                Some(name) => mode = CliMode::Album(name),
                None => anyhow::bail!("--album requires an album name"),
            },
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: synofotod [--list-albums | --album <name>]");
        println!("  --list-albums   Print album names by scope and exit");
        println!("  --album <name>  Print display paths of an album's files and exit");
        return Ok(());
    }

    init_tracing();
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::ListAlbums => {
            let listing = daemon.album_listing().await;
            daemon.shutdown().await;
            print!("{}", listing?);
            Ok(())
        }
        CliMode::Album(name) => {
            let paths = daemon.album_paths(&name).await;
            daemon.shutdown().await;
            for path in paths? {
                println!("{path}");
            }
            Ok(())
        }
        CliMode::Run | CliMode::Help => daemon.run().await,
    }
}

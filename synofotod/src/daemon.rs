use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use synofoto_core::{ClientOptions, Credentials, Scope};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sync::engine::{EngineConfig, IndexEngine};

const DATA_DIR_NAME: &str = "synofoto";
const DEFAULT_REFRESH_SECS: u64 = 3600;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub data_dir: PathBuf,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Self::from_lookup(|name| std::env::var(name).ok(), &home)
    }

    /// Builds the config from any variable source. `~` in the data directory
    /// expands against `home`.
    pub fn from_lookup<F>(lookup: F, home: &Path) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = require_var(&lookup, "SYNOFOTO_URL")?;
        let username = require_var(&lookup, "SYNOFOTO_USERNAME")?;
        let password = require_var(&lookup, "SYNOFOTO_PASSWORD")?;
        let data_dir = lookup("SYNOFOTO_DATA_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_data_dir(home));
        let refresh_interval = Duration::from_secs(read_u64_var(
            &lookup,
            "SYNOFOTO_REFRESH_SECS",
            DEFAULT_REFRESH_SECS,
        ));
        let request_timeout = Duration::from_secs(read_u64_var(
            &lookup,
            "SYNOFOTO_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        ));
        let accept_invalid_certs = read_bool_var(&lookup, "SYNOFOTO_ACCEPT_INVALID_CERTS", false);

        Ok(Self {
            base_url,
            credentials: Credentials::new(username, password),
            data_dir,
            refresh_interval,
            request_timeout,
            accept_invalid_certs,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            base_url: self.base_url.clone(),
            credentials: self.credentials.clone(),
            refresh_interval: self.refresh_interval,
            data_dir: self.data_dir.clone(),
            client: ClientOptions {
                timeout: self.request_timeout,
                accept_invalid_certs: self.accept_invalid_certs,
                ..ClientOptions::default()
            },
        }
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: IndexEngine,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("failed to create data dir at {:?}", config.data_dir))?;

        let engine =
            IndexEngine::open(config.engine_config()).context("failed to open index engine")?;
        engine
            .connect()
            .await
            .with_context(|| format!("failed to log in to {}", config.base_url))?;

        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    /// Refreshes in the background until Ctrl-C, then shuts the engine down.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            url = %self.config.base_url,
            data_dir = %self.config.data_dir.display(),
            refresh_secs = self.config.refresh_interval.as_secs(),
            "synofotod started"
        );
        self.engine
            .start()
            .context("failed to start refresh loop")?;

        let signal = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        self.engine.stop().await;
        signal.context("failed to listen for Ctrl-C")
    }

    pub async fn album_listing(&self) -> anyhow::Result<String> {
        let personal = self
            .engine
            .album_names(Scope::Personal)
            .await
            .context("failed to list albums")?;
        let shared = self
            .engine
            .album_names(Scope::Shared)
            .await
            .context("failed to list albums")?;
        Ok(format_album_listing(&personal, &shared))
    }

    /// Display paths of every file in `name`. Crawls the folder tree first
    /// when nothing was restored from disk.
    pub async fn album_paths(&self, name: &str) -> anyhow::Result<Vec<String>> {
        if self.engine.folder_count() == 0 {
            self.engine.refresh_pass(&CancellationToken::new()).await;
        }
        let ids = self
            .engine
            .get_file_list(name, false)
            .await
            .with_context(|| format!("failed to load album {name:?}"))?;
        Ok(ids
            .iter()
            .filter_map(|id| self.engine.file_path(id))
            .collect())
    }

    pub async fn shutdown(&self) {
        self.engine.stop().await;
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;

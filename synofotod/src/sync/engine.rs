use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use synofoto_core::{ClientOptions, Credentials, Scope, SynoClient, SynoError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::NotFoundError;
use super::albums::{AlbumCache, FileRecord};
use super::folders::FolderIndex;
use super::scheduler::{Scheduler, SchedulerError, SchedulerState};
use super::store::{SnapshotStore, StoreError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("remote error: {0}")]
    Remote(#[from] SynoError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub refresh_interval: Duration,
    pub data_dir: PathBuf,
    pub client: ClientOptions,
}

/// What one refresh pass achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub folders_merged: usize,
    pub failed_scopes: usize,
    pub albums: Option<usize>,
    pub persisted: bool,
    pub cancelled: bool,
}

struct EngineCore {
    client: SynoClient,
    folders: FolderIndex,
    albums: AlbumCache,
    store: SnapshotStore,
}

impl EngineCore {
    async fn refresh_pass(&self, cancel: &CancellationToken) -> PassReport {
        let mut report = PassReport::default();

        for scope in Scope::ALL {
            match self.folders.refresh(&self.client, scope, cancel).await {
                Ok(outcome) => {
                    report.folders_merged += outcome.merged;
                    if outcome.cancelled {
                        report.cancelled = true;
                        break;
                    }
                }
                Err(err) => {
                    warn!(%scope, "folder refresh failed: {err}");
                    report.failed_scopes += 1;
                }
            }
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
            info!(merged = report.folders_merged, "refresh pass cancelled");
            return report;
        }

        if report.failed_scopes == 0 {
            let snapshot = self.folders.snapshot();
            match self.store.save_folders(&snapshot).await {
                Ok(()) => report.persisted = true,
                Err(err) => warn!("failed to persist folder index: {err}"),
            }
        }

        match self.albums.refresh_albums(&self.client).await {
            Ok(count) => report.albums = Some(count),
            Err(err) => warn!("album list refresh failed: {err}"),
        }

        info!(
            merged = report.folders_merged,
            folders = self.folders.len(),
            failed_scopes = report.failed_scopes,
            persisted = report.persisted,
            "refresh pass finished"
        );
        report
    }
}

/// Owns the remote client, folder index, album cache and snapshot store,
/// and the scheduler that keeps them fresh.
pub struct IndexEngine {
    core: Arc<EngineCore>,
    scheduler: Scheduler,
    refresh_interval: Duration,
}

impl IndexEngine {
    /// Builds the engine and restores any snapshots under the data directory.
    /// No remote call is made.
    pub fn open(config: EngineConfig) -> Result<Self, CacheError> {
        let client =
            SynoClient::with_options(&config.base_url, config.credentials, config.client)?;
        let store = SnapshotStore::new(config.data_dir);
        Ok(Self::with_parts(client, store, config.refresh_interval))
    }

    pub fn with_parts(client: SynoClient, store: SnapshotStore, refresh_interval: Duration) -> Self {
        let folders = FolderIndex::from_snapshot(store.restore_folders());
        let albums = AlbumCache::from_snapshot(store.restore_albums());
        info!(
            root = %store.root().display(),
            folders = folders.len(),
            "index engine opened"
        );
        Self {
            core: Arc::new(EngineCore {
                client,
                folders,
                albums,
                store,
            }),
            scheduler: Scheduler::new(),
            refresh_interval,
        }
    }

    pub async fn connect(&self) -> Result<(), CacheError> {
        self.core.client.login().await?;
        info!(own_user_id = ?self.core.client.own_user_id(), "connected to photo library");
        Ok(())
    }

    /// Launches the background refresh loop.
    pub fn start(&self) -> Result<(), CacheError> {
        let core = Arc::clone(&self.core);
        self.scheduler.start(self.refresh_interval, move |cancel| {
            let core = Arc::clone(&core);
            async move {
                core.refresh_pass(&cancel).await;
            }
        })?;
        Ok(())
    }

    /// Crawls both scopes, then persists the folder index if both crawls
    /// completed, then re-enumerates album metadata.
    pub async fn refresh_pass(&self, cancel: &CancellationToken) -> PassReport {
        self.core.refresh_pass(cancel).await
    }

    pub async fn refresh_albums(&self) -> Result<usize, CacheError> {
        Ok(self.core.albums.refresh_albums(&self.core.client).await?)
    }

    /// Sorted album names in `scope`. Enumerates albums first if that has
    /// not happened yet.
    pub async fn album_names(&self, scope: Scope) -> Result<Vec<String>, CacheError> {
        if !self.core.albums.has_albums() {
            self.refresh_albums().await?;
        }
        Ok(self
            .core
            .albums
            .album_names(scope, self.core.client.own_user_id()))
    }

    pub async fn get_file_list(
        &self,
        album_name: &str,
        force_refresh: bool,
    ) -> Result<Vec<String>, CacheError> {
        let core = &self.core;
        core.albums
            .get_file_list(
                &core.client,
                &core.folders,
                &core.store,
                album_name,
                force_refresh,
            )
            .await
    }

    pub fn get_file_info(&self, file_id: &str) -> Result<FileRecord, NotFoundError> {
        self.core.albums.file_info(file_id)
    }

    pub fn file_path(&self, file_id: &str) -> Option<String> {
        self.core.albums.file_path(file_id)
    }

    pub fn resolve(&self, scope: Scope, folder_id: i64) -> Result<String, NotFoundError> {
        self.core.folders.resolve(scope, folder_id)
    }

    pub fn folder_count(&self) -> usize {
        self.core.folders.len()
    }

    pub fn pause(&self, paused: bool) {
        self.scheduler.pause(paused);
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Staged shutdown: joins the refresh loop, closes the store, then ends
    /// the remote session. Nothing is persisted after this returns.
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        self.core.store.close().await;
        if let Err(err) = self.core.client.logout().await {
            warn!("logout failed during shutdown: {err}");
        }
        info!("index engine stopped");
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::albums::AlbumSnapshot;
use super::folders::FolderTable;

const FOLDERS_FILENAME: &str = "folders.json";
const ALBUMS_FILENAME: &str = "albums.json";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot schema {found}")]
    Schema { found: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile<T> {
    schema: u32,
    saved_at: i64,
    payload: T,
}

/// Durable home of the folder index and album cache snapshots.
///
/// Each snapshot is written to a temporary sibling and renamed into place.
/// Once closed, the store silently drops every later write.
pub struct SnapshotStore {
    root: PathBuf,
    write_gate: Mutex<()>,
    closed: AtomicBool,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folders_path(&self) -> PathBuf {
        self.root.join(FOLDERS_FILENAME)
    }

    pub fn albums_path(&self) -> PathBuf {
        self.root.join(ALBUMS_FILENAME)
    }

    pub fn load_folders(&self) -> Result<Option<FolderTable>, StoreError> {
        load(&self.folders_path())
    }

    pub fn load_albums(&self) -> Result<Option<AlbumSnapshot>, StoreError> {
        load(&self.albums_path())
    }

    /// Folder snapshot from disk, or an empty one when it is missing or unreadable.
    pub fn restore_folders(&self) -> FolderTable {
        restore(&self.folders_path(), "folder index")
    }

    /// Album snapshot from disk, or an empty one when it is missing or unreadable.
    pub fn restore_albums(&self) -> AlbumSnapshot {
        restore(&self.albums_path(), "album cache")
    }

    pub async fn save_folders(&self, table: &FolderTable) -> Result<(), StoreError> {
        self.save(&self.folders_path(), table).await
    }

    pub async fn save_albums(&self, snapshot: &AlbumSnapshot) -> Result<(), StoreError> {
        self.save(&self.albums_path(), snapshot).await
    }

    /// Waits for any write in progress, then rejects all further writes.
    pub async fn close(&self) {
        let _gate = self.write_gate.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        debug!(root = %self.root.display(), "snapshot store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn save<T: Serialize>(&self, path: &Path, payload: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&SnapshotFile {
            schema: SCHEMA_VERSION,
            saved_at: OffsetDateTime::now_utc().unix_timestamp(),
            payload,
        })?;

        let _gate = self.write_gate.lock().await;
        if self.is_closed() {
            debug!(path = %path.display(), "store is closed, snapshot not written");
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.root).await?;
        let staging = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staging, path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let file: SnapshotFile<serde_json::Value> = serde_json::from_slice(&data)?;
    if file.schema != SCHEMA_VERSION {
        return Err(StoreError::Schema { found: file.schema });
    }
    Ok(Some(serde_json::from_value(file.payload)?))
}

fn restore<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    match load(path) {
        Ok(Some(value)) => {
            info!(path = %path.display(), "restored {what} snapshot");
            value
        }
        Ok(None) => {
            warn!(path = %path.display(), "no {what} snapshot found, starting empty");
            T::default()
        }
        Err(err) => {
            warn!(path = %path.display(), "ignoring unreadable {what} snapshot: {err}");
            T::default()
        }
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use synofoto_core::{Address, Album, AlbumItem, Scope, SynoClient, SynoError};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::NotFoundError;
use super::engine::CacheError;
use super::folders::FolderIndex;
use super::store::SnapshotStore;

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumMetadata {
    pub name: String,
    pub id: i64,
    pub handle: String,
    pub owner_id: i64,
    pub version: i64,
}

impl From<Album> for AlbumMetadata {
    fn from(album: Album) -> Self {
        Self {
            name: album.name,
            id: album.id,
            handle: album.passphrase,
            owner_id: album.owner_user_id,
            version: album.version,
        }
    }
}

/// EXIF orientation tag values 1 through 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Normal,
    MirrorHorizontal,
    Rotate180,
    MirrorVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    pub fn from_exif(value: i64) -> Option<Self> {
        Some(match value {
            1 => Orientation::Normal,
            2 => Orientation::MirrorHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::MirrorVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub display_path: String,
    #[serde(with = "time::serde::timestamp")]
    pub captured_at: OffsetDateTime,
    pub orientation: Option<Orientation>,
    pub location: Option<String>,
    pub caption: String,
}

/// Resolved file list of one album, valid while `version` matches the
/// album's current remote version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumCacheEntry {
    pub album_name: String,
    pub version: i64,
    pub file_ids: Vec<String>,
    pub files: HashMap<String, FileRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumSnapshot {
    pub entries: BTreeMap<String, AlbumCacheEntry>,
}

#[derive(Default)]
struct AlbumState {
    albums: Option<HashMap<String, AlbumMetadata>>,
    entries: HashMap<String, Arc<AlbumCacheEntry>>,
    active: Option<Arc<AlbumCacheEntry>>,
}

pub struct AlbumCache {
    state: Mutex<AlbumState>,
}

impl Default for AlbumCache {
    fn default() -> Self {
        Self::from_snapshot(AlbumSnapshot::default())
    }
}

impl AlbumCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: AlbumSnapshot) -> Self {
        let entries = snapshot
            .entries
            .into_iter()
            .map(|(name, entry)| (name, Arc::new(entry)))
            .collect();
        Self {
            state: Mutex::new(AlbumState {
                albums: None,
                entries,
                active: None,
            }),
        }
    }

    /// Replaces the album metadata with a fresh listing of every album.
    pub async fn refresh_albums(&self, client: &SynoClient) -> Result<usize, SynoError> {
        let albums: HashMap<String, AlbumMetadata> = client
            .list_albums()
            .await?
            .into_iter()
            .map(|album| (album.name.clone(), AlbumMetadata::from(album)))
            .collect();
        let count = albums.len();
        self.lock().albums = Some(albums);
        debug!(count, "album list refreshed");
        Ok(count)
    }

    pub fn has_albums(&self) -> bool {
        self.lock().albums.is_some()
    }

    pub fn metadata(&self, name: &str) -> Option<AlbumMetadata> {
        self.lock()
            .albums
            .as_ref()
            .and_then(|albums| albums.get(name).cloned())
    }

    /// Album names in `scope`, sorted. Ownership is decided by comparing the
    /// album owner to `own_user_id`; an unknown own id puts every album in
    /// the shared scope.
    pub fn album_names(&self, scope: Scope, own_user_id: Option<i64>) -> Vec<String> {
        let state = self.lock();
        let Some(albums) = state.albums.as_ref() else {
            return Vec::new();
        };
        let mut names: Vec<String> = albums
            .values()
            .filter(|album| album_scope(album, own_user_id) == scope)
            .map(|album| album.name.clone())
            .collect();
        names.sort();
        names
    }

    /// File ids of `name` in remote order. A cached entry whose version still
    /// matches the album metadata is returned without any remote call.
    pub async fn get_file_list(
        &self,
        client: &SynoClient,
        folders: &FolderIndex,
        store: &SnapshotStore,
        name: &str,
        force_refresh: bool,
    ) -> Result<Vec<String>, CacheError> {
        if !self.has_albums() {
            self.refresh_albums(client).await?;
        }
        let album = self
            .metadata(name)
            .ok_or_else(|| NotFoundError::Album(name.to_string()))?;

        if !force_refresh && let Some(entry) = self.cached(name, album.version) {
            debug!(album = name, version = album.version, "album cache hit");
            let file_ids = entry.file_ids.clone();
            self.lock().active = Some(entry);
            return Ok(file_ids);
        }

        info!(album = name, version = album.version, "fetching album contents");
        let items = client.list_album_items(album.id, &album.handle).await?;
        let entry = Arc::new(build_entry(&album, items, folders));
        let file_ids = entry.file_ids.clone();

        let snapshot = {
            let mut state = self.lock();
            state.entries.insert(name.to_string(), Arc::clone(&entry));
            state.active = Some(entry);
            snapshot_of(&state)
        };
        if let Err(err) = store.save_albums(&snapshot).await {
            warn!(album = name, "failed to persist album cache: {err}");
        }
        Ok(file_ids)
    }

    /// Record of `file_id` in the album most recently returned by
    /// [`AlbumCache::get_file_list`].
    pub fn file_info(&self, file_id: &str) -> Result<FileRecord, NotFoundError> {
        self.lock()
            .active
            .as_ref()
            .and_then(|entry| entry.files.get(file_id).cloned())
            .ok_or_else(|| NotFoundError::File(file_id.to_string()))
    }

    pub fn file_path(&self, file_id: &str) -> Option<String> {
        self.file_info(file_id)
            .ok()
            .map(|record| record.display_path)
    }

    pub fn active_album(&self) -> Option<String> {
        self.lock()
            .active
            .as_ref()
            .map(|entry| entry.album_name.clone())
    }

    pub fn snapshot(&self) -> AlbumSnapshot {
        snapshot_of(&self.lock())
    }

    fn cached(&self, name: &str, version: i64) -> Option<Arc<AlbumCacheEntry>> {
        self.lock()
            .entries
            .get(name)
            .filter(|entry| entry.version == version)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, AlbumState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn snapshot_of(state: &AlbumState) -> AlbumSnapshot {
    AlbumSnapshot {
        entries: state
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), AlbumCacheEntry::clone(entry)))
            .collect(),
    }
}

fn album_scope(album: &AlbumMetadata, own_user_id: Option<i64>) -> Scope {
    if own_user_id == Some(album.owner_id) {
        Scope::Personal
    } else {
        Scope::Shared
    }
}

/// Resolves every item against the folder index. Items whose folder is not
/// indexed are left out of the entry.
pub fn build_entry(
    album: &AlbumMetadata,
    items: Vec<AlbumItem>,
    folders: &FolderIndex,
) -> AlbumCacheEntry {
    let total = items.len();
    let mut file_ids = Vec::with_capacity(total);
    let mut files = HashMap::with_capacity(total);

    for (processed, item) in items.into_iter().enumerate() {
        if (processed + 1) % PROGRESS_EVERY == 0 {
            info!(album = %album.name, processed = processed + 1, total, "resolving album items");
        }
        let Some(scope) = item_scope(&item, folders) else {
            debug!(file_id = item.id, folder_id = item.folder_id, "skipping file in unindexed folder");
            continue;
        };
        let Some(folder) = folders.get(scope, item.folder_id) else {
            debug!(
                "skipping file {}: {}",
                item.id,
                NotFoundError::Folder {
                    scope,
                    id: item.folder_id
                }
            );
            continue;
        };

        let file_id = item.id.to_string();
        let record = FileRecord {
            file_id: file_id.clone(),
            display_path: display_path(scope, folder.path_fragment(), &item.filename),
            captured_at: item
                .time
                .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
                .unwrap_or_else(OffsetDateTime::now_utc),
            orientation: item.additional.orientation.and_then(Orientation::from_exif),
            location: location(item.additional.address.as_ref()),
            caption: folder.name.clone(),
        };
        files.insert(file_id.clone(), record);
        file_ids.push(file_id);
    }

    let skipped = total - file_ids.len();
    if skipped > 0 {
        info!(album = %album.name, skipped, "some album files could not be resolved");
    }
    AlbumCacheEntry {
        album_name: album.name.clone(),
        version: album.version,
        file_ids,
        files,
    }
}

/// Scope of the index that holds the item's folder. When both scopes hold
/// the id, an item with a non-zero owner is personal and anything else is
/// shared.
fn item_scope(item: &AlbumItem, folders: &FolderIndex) -> Option<Scope> {
    match folders.scopes_of(item.folder_id).as_slice() {
        [] => None,
        [scope] => Some(*scope),
        _ => match item.owner_user_id {
            Some(owner) if owner != 0 => Some(Scope::Personal),
            _ => Some(Scope::Shared),
        },
    }
}

pub fn display_path(scope: Scope, fragment: &str, filename: &str) -> String {
    [scope.path_prefix(), fragment.trim_matches('/'), filename]
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn location(address: Option<&Address>) -> Option<String> {
    let address = address?;
    let locality = non_empty(&address.city)
        .or_else(|| non_empty(&address.town))
        .or_else(|| non_empty(&address.village));
    match (locality, non_empty(&address.country)) {
        (Some(locality), Some(country)) => Some(format!("{locality},{country}")),
        (Some(locality), None) => Some(locality.to_string()),
        (None, Some(country)) => Some(country.to_string()),
        (None, None) => None,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
#[path = "albums_tests.rs"]
mod tests;

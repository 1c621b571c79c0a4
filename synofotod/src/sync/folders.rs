use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use synofoto_core::{Folder, Scope, SynoClient, SynoError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::NotFoundError;

/// Name the server gives the top folder of each scope.
pub const ROOT_FOLDER_NAME: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderKey {
    pub scope: Scope,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    pub id: i64,
    pub name: String,
    pub handle: String,
    pub scope: Scope,
}

impl FolderNode {
    pub fn from_remote(folder: Folder, scope: Scope) -> Self {
        Self {
            id: folder.id,
            name: folder.name,
            handle: folder.passphrase,
            scope,
        }
    }

    pub fn key(&self) -> FolderKey {
        FolderKey {
            scope: self.scope,
            id: self.id,
        }
    }

    /// Display-path fragment for files stored in this folder.
    pub fn path_fragment(&self) -> &str {
        if self.name == ROOT_FOLDER_NAME {
            ""
        } else {
            &self.name
        }
    }
}

/// Snapshot of every indexed folder, keyed by `(scope, id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FolderNode>", into = "Vec<FolderNode>")]
pub struct FolderTable {
    nodes: HashMap<FolderKey, FolderNode>,
}

impl FolderTable {
    /// Inserts or replaces each node by key; the last one merged wins.
    pub fn merge(&mut self, nodes: impl IntoIterator<Item = FolderNode>) -> usize {
        let mut merged = 0;
        for node in nodes {
            self.nodes.insert(node.key(), node);
            merged += 1;
        }
        merged
    }

    pub fn get(&self, scope: Scope, id: i64) -> Option<&FolderNode> {
        self.nodes.get(&FolderKey { scope, id })
    }

    pub fn resolve(&self, scope: Scope, id: i64) -> Result<&str, NotFoundError> {
        self.get(scope, id)
            .map(FolderNode::path_fragment)
            .ok_or(NotFoundError::Folder { scope, id })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count(&self, scope: Scope) -> usize {
        self.nodes.keys().filter(|key| key.scope == scope).count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FolderNode> {
        self.nodes.values()
    }
}

impl From<Vec<FolderNode>> for FolderTable {
    fn from(nodes: Vec<FolderNode>) -> Self {
        let mut table = FolderTable::default();
        table.merge(nodes);
        table
    }
}

impl From<FolderTable> for Vec<FolderNode> {
    fn from(table: FolderTable) -> Self {
        let mut nodes: Vec<FolderNode> = table.nodes.into_values().collect();
        nodes.sort_by_key(FolderNode::key);
        nodes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    Building,
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub merged: usize,
    pub expanded: usize,
    pub cancelled: bool,
}

/// Live folder index shared between the refresh loop and readers.
///
/// Listing results are merged one batch at a time under a short write lock;
/// the lock is never held while a remote call is pending.
pub struct FolderIndex {
    table: RwLock<FolderTable>,
    states: Mutex<HashMap<Scope, BuildState>>,
}

impl Default for FolderIndex {
    fn default() -> Self {
        Self::from_snapshot(FolderTable::default())
    }
}

impl FolderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(table: FolderTable) -> Self {
        let states = Scope::ALL
            .into_iter()
            .map(|scope| {
                let state = if table.count(scope) > 0 {
                    BuildState::Ready
                } else {
                    BuildState::Empty
                };
                (scope, state)
            })
            .collect();
        Self {
            table: RwLock::new(table),
            states: Mutex::new(states),
        }
    }

    pub fn state(&self, scope: Scope) -> BuildState {
        self.lock_states()
            .get(&scope)
            .copied()
            .unwrap_or(BuildState::Empty)
    }

    pub fn resolve(&self, scope: Scope, id: i64) -> Result<String, NotFoundError> {
        self.read().resolve(scope, id).map(str::to_string)
    }

    pub fn get(&self, scope: Scope, id: i64) -> Option<FolderNode> {
        self.read().get(scope, id).cloned()
    }

    /// Scopes whose index holds a folder with this id.
    pub fn scopes_of(&self, id: i64) -> Vec<Scope> {
        let table = self.read();
        Scope::ALL
            .into_iter()
            .filter(|scope| table.get(*scope, id).is_some())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn snapshot(&self) -> FolderTable {
        self.read().clone()
    }

    pub fn merge(&self, nodes: impl IntoIterator<Item = FolderNode>) -> usize {
        self.write().merge(nodes)
    }

    /// Crawls `scope` breadth first from its root, merging every folder
    /// found. Cancellation is checked before each remote call; whatever was
    /// merged before it stays in the index.
    pub async fn refresh(
        &self,
        client: &SynoClient,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome, SynoError> {
        self.set_state(scope, BuildState::Building);
        let result = self.crawl(client, scope, cancel).await;
        let completed = matches!(&result, Ok(outcome) if !outcome.cancelled);
        let settled = if completed || self.read().count(scope) > 0 {
            BuildState::Ready
        } else {
            BuildState::Empty
        };
        self.set_state(scope, settled);
        result
    }

    async fn crawl(
        &self,
        client: &SynoClient,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome, SynoError> {
        let mut outcome = RefreshOutcome::default();
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        let mut expanded = HashSet::new();
        if let Some(root) = client.root_folder(scope).await? {
            expanded.insert(root.id);
            outcome.merged += self.merge([FolderNode::from_remote(root, scope)]);
        }

        // `None` lists the children of the scope root.
        let mut pending: VecDeque<Option<i64>> = VecDeque::from([None]);
        while let Some(parent) = pending.pop_front() {
            if cancel.is_cancelled() {
                debug!(%scope, "folder crawl cancelled");
                outcome.cancelled = true;
                return Ok(outcome);
            }
            let children = client.list_folders(parent, scope).await?;
            outcome.expanded += 1;
            for child in &children {
                if expanded.insert(child.id) {
                    pending.push_back(Some(child.id));
                }
            }
            outcome.merged += self.merge(
                children
                    .into_iter()
                    .map(|folder| FolderNode::from_remote(folder, scope)),
            );
        }

        info!(
            %scope,
            merged = outcome.merged,
            expanded = outcome.expanded,
            "folder crawl completed"
        );
        Ok(outcome)
    }

    fn set_state(&self, scope: Scope, state: BuildState) {
        self.lock_states().insert(scope, state);
    }

    fn read(&self) -> RwLockReadGuard<'_, FolderTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FolderTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<Scope, BuildState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "folders_tests.rs"]
mod tests;

//! Local store: durable save/load of the client replica.
//!
//! One pretty-printed JSON file per user, `todo_data_<user>.json` inside the
//! data directory. Saves go to a temporary sibling first and are renamed over
//! the target, so a crash mid-write leaves the previous file intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tasksync_core::{Collection, CollectionEntry, Item, ReplicaState, SyncDelta, UserId};
use thiserror::Error;
use tracing::{debug, info};

/// Current on-disk layout version.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store file {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported store version {0} (expected {STORE_VERSION})")]
    UnsupportedVersion(u32),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable form of a replica.
#[derive(Debug, Serialize, Deserialize)]
struct StoredReplica {
    version: u32,
    uncompleted: Vec<Item>,
    completed: Vec<Item>,
    collections: Vec<CollectionEntry>,
    #[serde(default)]
    tombstones: Vec<Item>,
    #[serde(default)]
    collection_tombstones: Vec<Collection>,
}

impl StoredReplica {
    fn from_state(state: &ReplicaState) -> Self {
        Self {
            version: STORE_VERSION,
            uncompleted: state.uncompleted().cloned().collect(),
            completed: state.completed().cloned().collect(),
            collections: state
                .collections()
                .map(|c| CollectionEntry::new(c.clone(), state.items_in(&c.id).cloned().collect()))
                .collect(),
            tombstones: state.tombstones().cloned().collect(),
            collection_tombstones: state.collection_tombstones().cloned().collect(),
        }
    }

    fn into_state(self) -> ReplicaState {
        let mut items = self.uncompleted;
        items.extend(self.completed);
        let mut collections = self.collections;
        collections.extend(
            self.collection_tombstones
                .into_iter()
                .map(|c| CollectionEntry::new(c, Vec::new())),
        );
        ReplicaState::from_delta(SyncDelta {
            items,
            deleted: self.tombstones,
            collections,
        })
    }
}

/// File-backed store for one user's replica.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(data_dir: &Path, user: &UserId) -> Self {
        Self {
            path: data_dir.join(format!("todo_data_{}.json", user)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored replica. `Ok(None)` on first run (no file yet).
    pub fn load(&self) -> Result<Option<ReplicaState>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No local data at {:?}, starting empty", self.path);
                return Ok(None);
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let stored: StoredReplica =
            serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if stored.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion(stored.version));
        }

        let state = stored.into_state();
        info!(
            "Loaded {} items and {} collections from {:?}",
            state.items().count(),
            state.collections().count(),
            self.path
        );
        Ok(Some(state))
    }

    /// Write the replica, replacing any previous file.
    pub fn save(&self, state: &ReplicaState) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(&StoredReplica::from_state(state))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        debug!("Saved replica to {:?}", self.path);
        Ok(())
    }
}

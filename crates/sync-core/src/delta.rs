//! The Sync Delta: the payload exchanged in both directions of a sync.
//!
//! It is not a minimal diff. A sender ships every live item it holds, every
//! tombstone it has not yet had acknowledged, and every collection with its
//! items nested inside; the receiver's merge discards what it already has.

use crate::record::{Collection, Item};
use serde::{Deserialize, Serialize};

/// A collection together with the items that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub collection: Collection,
    pub items: Vec<Item>,
}

impl CollectionEntry {
    pub fn new(collection: Collection, items: Vec<Item>) -> Self {
        Self { collection, items }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDelta {
    /// All current items the sender holds, filed and unfiled.
    pub items: Vec<Item>,
    /// Items the sender has deleted and not yet had acknowledged.
    pub deleted: Vec<Item>,
    /// All collections, each carrying its own items.
    pub collections: Vec<CollectionEntry>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.deleted.is_empty() && self.collections.is_empty()
    }
}

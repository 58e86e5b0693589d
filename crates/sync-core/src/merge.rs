//! Merge engine: reconcile a local replica with a peer's Sync Delta.
//!
//! Both the client and the server run [`reconcile`]. The steps, in order:
//!
//! 1. Apply the remote tombstones. A listed item is removed from the live
//!    set no matter how recent the local copy is, and remembered as a tombstone.
//!    Remote deleted collections are applied the same way, together with the
//!    items they own.
//! 2. Reconcile the remote live items by id. Unknown and not deleted: adopt.
//!    Known: overwrite the local fields in place iff the remote
//!    `last_modified` is strictly greater. Equal timestamps keep local.
//! 3. Purge items that ended up marked deleted, keeping them as tombstones.
//! 4. Reconcile live collections the same way, then each collection's nested
//!    items with the step 2 rule, attached to that collection.
//! 5. Move collections that ended up deleted out of the live set, along with
//!    the items they own.
//!
//! A deletion always beats a live copy, for items and collections alike, so
//! the outcome does not depend on the order deltas arrive in. An id already
//! present in the local tombstone tables is never brought back to life.
//!
//! The merge is a pure in-memory transformation and cannot fail. Applying the
//! same delta twice leaves the state exactly as applying it once.

use crate::delta::SyncDelta;
use crate::ids::{CollectionId, ItemId};
use crate::record::{Collection, Item};
use crate::replica::ReplicaState;
use serde::Serialize;
use tracing::debug;

/// What a merge changed. Empty when the delta brought nothing new.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Live items removed because the peer tombstoned them.
    pub items_tombstoned: Vec<ItemId>,
    /// Tombstones learned from the peer that were not known locally.
    pub tombstones_learned: Vec<ItemId>,
    /// Items adopted from the peer.
    pub items_adopted: Vec<ItemId>,
    /// Local items overwritten by a strictly newer remote copy.
    pub items_updated: Vec<ItemId>,
    /// Items purged because they ended up marked deleted.
    pub items_purged: Vec<ItemId>,
    pub collections_adopted: Vec<CollectionId>,
    pub collections_updated: Vec<CollectionId>,
    /// Live collections removed because they were deleted, here or by the peer.
    pub collections_purged: Vec<CollectionId>,
    /// Collection deletions learned for collections never seen live here.
    pub collection_tombstones_learned: Vec<CollectionId>,
}

impl MergeReport {
    /// True when no live record changed.
    ///
    /// Learned tombstones are left out: a client re-learns the deletions it
    /// already pushed on every pull.
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// True when the replica changed at all, tombstone tables included.
    pub fn changed_state(&self) -> bool {
        !self.is_empty()
            || !self.tombstones_learned.is_empty()
            || !self.collection_tombstones_learned.is_empty()
    }

    /// Number of live records adopted, updated or removed.
    pub fn change_count(&self) -> usize {
        self.items_tombstoned.len()
            + self.items_adopted.len()
            + self.items_updated.len()
            + self.items_purged.len()
            + self.collections_adopted.len()
            + self.collections_updated.len()
            + self.collections_purged.len()
    }
}

/// Merge `remote` into `local` in place.
pub fn reconcile(local: &mut ReplicaState, remote: &SyncDelta) -> MergeReport {
    let mut report = MergeReport::default();

    apply_tombstones(local, remote, &mut report);
    apply_collection_tombstones(local, remote, &mut report);

    for item in &remote.items {
        merge_item(local, item, None, &mut report);
    }
    purge_deleted_items(local, &mut report);

    merge_collections(local, remote, &mut report);
    purge_deleted_items(local, &mut report);
    purge_deleted_collections(local, &mut report);

    if report.changed_state() {
        debug!(
            "Merged delta: {} adopted, {} updated, {} tombstoned, {} collections adopted, {} collections purged",
            report.items_adopted.len(),
            report.items_updated.len(),
            report.items_tombstoned.len(),
            report.collections_adopted.len(),
            report.collections_purged.len()
        );
    }

    report
}

fn apply_tombstones(local: &mut ReplicaState, remote: &SyncDelta, report: &mut MergeReport) {
    for dead in &remote.deleted {
        if local.items.remove(&dead.id).is_some() {
            report.items_tombstoned.push(dead.id.clone());
        }
        if !local.tombstones.contains_key(&dead.id) {
            let mut tombstone = dead.clone();
            tombstone.deleted = true;
            local.tombstones.insert(dead.id.clone(), tombstone);
            report.tombstones_learned.push(dead.id.clone());
        }
    }
}

fn apply_collection_tombstones(
    local: &mut ReplicaState,
    remote: &SyncDelta,
    report: &mut MergeReport,
) {
    let dead = remote
        .collections
        .iter()
        .map(|entry| &entry.collection)
        .filter(|c| c.deleted);

    for incoming in dead {
        if local.collection_tombstones.contains_key(&incoming.id) {
            continue;
        }
        if local.collections.contains_key(&incoming.id) {
            bury_collection(local, incoming.clone(), report);
        } else {
            local
                .collection_tombstones
                .insert(incoming.id.clone(), incoming.clone());
            report.collection_tombstones_learned.push(incoming.id.clone());
        }
    }
}

/// Step 2 rule for one remote item. `owner` is set when the item arrived
/// nested inside a collection.
fn merge_item(
    local: &mut ReplicaState,
    remote: &Item,
    owner: Option<&CollectionId>,
    report: &mut MergeReport,
) {
    if local.tombstones.contains_key(&remote.id) {
        return;
    }

    match local.items.get_mut(&remote.id) {
        Some(existing) => {
            if remote.last_modified > existing.last_modified {
                existing.title.clone_from(&remote.title);
                existing.completed = remote.completed;
                existing.deleted = remote.deleted;
                existing.last_modified = remote.last_modified;
                report.items_updated.push(remote.id.clone());
            }
        }
        None => {
            if remote.deleted {
                return;
            }
            let mut adopted = remote.clone();
            if let Some(owner) = owner {
                adopted.collection_id = Some(owner.clone());
            }
            if let Some(cid) = &adopted.collection_id {
                if local.collection_tombstones.contains_key(cid) {
                    return;
                }
            }
            local.items.insert(adopted.id.clone(), adopted);
            report.items_adopted.push(remote.id.clone());
        }
    }
}

fn merge_collections(local: &mut ReplicaState, remote: &SyncDelta, report: &mut MergeReport) {
    for entry in &remote.collections {
        let incoming = &entry.collection;
        if incoming.deleted || local.collection_tombstones.contains_key(&incoming.id) {
            continue;
        }

        match local.collections.get_mut(&incoming.id) {
            Some(existing) => {
                if incoming.last_modified > existing.last_modified {
                    existing.name.clone_from(&incoming.name);
                    existing.last_modified = incoming.last_modified;
                    report.collections_updated.push(incoming.id.clone());
                }
            }
            None => {
                local
                    .collections
                    .insert(incoming.id.clone(), incoming.clone());
                report.collections_adopted.push(incoming.id.clone());
            }
        }

        for item in &entry.items {
            merge_item(local, item, Some(&incoming.id), report);
        }
    }
}

fn purge_deleted_items(local: &mut ReplicaState, report: &mut MergeReport) {
    let dead: Vec<ItemId> = local
        .items
        .values()
        .filter(|i| i.deleted)
        .map(|i| i.id.clone())
        .collect();
    for id in dead {
        if let Some(item) = local.items.remove(&id) {
            local.tombstones.entry(id.clone()).or_insert(item);
        }
        report.items_purged.push(id);
    }
}

fn purge_deleted_collections(local: &mut ReplicaState, report: &mut MergeReport) {
    let dead: Vec<Collection> = local
        .collections
        .values()
        .filter(|c| c.deleted)
        .cloned()
        .collect();

    for collection in dead {
        bury_collection(local, collection, report);
    }
}

/// Replace a live collection with its deleted `record` and tombstone every
/// item it owns.
fn bury_collection(local: &mut ReplicaState, mut record: Collection, report: &mut MergeReport) {
    let id = record.id.clone();
    local.collections.remove(&id);
    record.deleted = true;
    local.collection_tombstones.insert(id.clone(), record);

    let owned: Vec<ItemId> = local.items_in(&id).map(|i| i.id.clone()).collect();
    for item_id in owned {
        if let Some(mut item) = local.items.remove(&item_id) {
            item.deleted = true;
            local.tombstones.insert(item_id.clone(), item);
            report.items_purged.push(item_id);
        }
    }
    report.collections_purged.push(id);
}

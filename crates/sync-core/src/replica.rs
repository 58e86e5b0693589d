//! ReplicaState: one participant's copy of the shared task state.
//!
//! Records live in flat tables keyed by identifier. Ownership is the
//! `collection_id` foreign key on each item, resolved on demand; there are no
//! object links to repair after loading or decoding.

use crate::delta::{CollectionEntry, SyncDelta};
use crate::ids::{CollectionId, ItemId};
use crate::record::{Collection, CollectionChange, Item, ItemChange};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaState {
    /// Live items, completed or not, filed or not.
    pub(crate) items: BTreeMap<ItemId, Item>,
    /// Live collections.
    pub(crate) collections: BTreeMap<CollectionId, Collection>,
    /// Deleted items retained until the deletion has been propagated.
    pub(crate) tombstones: BTreeMap<ItemId, Item>,
    /// Deleted collections retained until the deletion has been propagated.
    pub(crate) collection_tombstones: BTreeMap<CollectionId, Collection>,
}

impl ReplicaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a replica from stored records.
    ///
    /// Records marked deleted are routed to the tombstone tables regardless
    /// of which list they came from.
    pub fn from_records(
        items: impl IntoIterator<Item = Item>,
        collections: impl IntoIterator<Item = Collection>,
        tombstones: impl IntoIterator<Item = Item>,
        collection_tombstones: impl IntoIterator<Item = Collection>,
    ) -> Self {
        let mut state = Self::new();
        for collection in collections.into_iter().chain(collection_tombstones) {
            if collection.deleted {
                state
                    .collection_tombstones
                    .insert(collection.id.clone(), collection);
            } else {
                state.collections.insert(collection.id.clone(), collection);
            }
        }
        for item in items.into_iter().chain(tombstones) {
            if item.deleted {
                state.tombstones.insert(item.id.clone(), item);
            } else {
                state.items.insert(item.id.clone(), item);
            }
        }
        state
    }

    /// Rebuild a replica from a delta-shaped value.
    ///
    /// Nested collection items are attached to the collection they arrived in.
    pub fn from_delta(delta: SyncDelta) -> Self {
        let mut items = delta.items;
        let mut collections = Vec::with_capacity(delta.collections.len());
        for entry in delta.collections {
            let owner = entry.collection.id.clone();
            items.extend(
                entry
                    .items
                    .into_iter()
                    .map(|item| item.in_collection(owner.clone())),
            );
            collections.push(entry.collection);
        }
        Self::from_records(items, collections, delta.deleted, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
            && self.collections.is_empty()
            && self.tombstones.is_empty()
            && self.collection_tombstones.is_empty()
    }

    // --- Items ---

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn item_mut(&mut self, id: &ItemId) -> Option<&mut Item> {
        self.items.get_mut(id)
    }

    pub fn insert_item(&mut self, item: Item) {
        self.items.insert(item.id.clone(), item);
    }

    /// All live items.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Live items without an owning collection.
    pub fn unfiled(&self) -> impl Iterator<Item = &Item> {
        self.items.values().filter(|i| i.collection_id.is_none())
    }

    /// Unfiled items not yet completed.
    pub fn uncompleted(&self) -> impl Iterator<Item = &Item> {
        self.unfiled().filter(|i| !i.completed)
    }

    /// Unfiled items already completed.
    pub fn completed(&self) -> impl Iterator<Item = &Item> {
        self.unfiled().filter(|i| i.completed)
    }

    /// Live items owned by `collection_id`.
    pub fn items_in<'a>(
        &'a self,
        collection_id: &'a CollectionId,
    ) -> impl Iterator<Item = &'a Item> + 'a {
        self.items
            .values()
            .filter(move |i| i.collection_id.as_ref() == Some(collection_id))
    }

    /// Live items sharing an owner with `collection_id` (`None` = unfiled).
    pub fn siblings<'a>(
        &'a self,
        collection_id: Option<&'a CollectionId>,
    ) -> impl Iterator<Item = &'a Item> + 'a {
        self.items
            .values()
            .filter(move |i| i.collection_id.as_ref() == collection_id)
    }

    /// Move a live item into the tombstone set, stamping it deleted.
    pub fn tombstone_item(&mut self, id: &ItemId) -> Option<ItemChange> {
        let mut item = self.items.remove(id)?;
        let change = item.set_deleted(true);
        self.tombstones.insert(item.id.clone(), item);
        Some(change)
    }

    pub fn tombstones(&self) -> impl Iterator<Item = &Item> {
        self.tombstones.values()
    }

    pub fn is_tombstoned(&self, id: &ItemId) -> bool {
        self.tombstones.contains_key(id)
    }

    /// Forget tombstones whose deletion the peer has acknowledged.
    pub fn clear_tombstones<'a>(&mut self, ids: impl IntoIterator<Item = &'a ItemId>) {
        for id in ids {
            self.tombstones.remove(id);
        }
    }

    // --- Collections ---

    pub fn collection(&self, id: &CollectionId) -> Option<&Collection> {
        self.collections.get(id)
    }

    pub fn collection_mut(&mut self, id: &CollectionId) -> Option<&mut Collection> {
        self.collections.get_mut(id)
    }

    pub fn insert_collection(&mut self, collection: Collection) {
        self.collections.insert(collection.id.clone(), collection);
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn collection_named(&self, name: &str) -> Option<&Collection> {
        self.collections.values().find(|c| c.name == name)
    }

    /// Delete a collection and tombstone every item it owns.
    ///
    /// Returns the collection change followed by one change per item.
    pub fn tombstone_collection(
        &mut self,
        id: &CollectionId,
    ) -> Option<(CollectionChange, Vec<ItemChange>)> {
        let mut collection = self.collections.remove(id)?;
        let change = collection.set_deleted(true);
        self.collection_tombstones
            .insert(collection.id.clone(), collection);

        let owned: Vec<ItemId> = self.items_in(id).map(|i| i.id.clone()).collect();
        let item_changes = owned
            .iter()
            .filter_map(|item_id| self.tombstone_item(item_id))
            .collect();
        Some((change, item_changes))
    }

    pub fn collection_tombstones(&self) -> impl Iterator<Item = &Collection> {
        self.collection_tombstones.values()
    }

    pub fn is_collection_tombstoned(&self, id: &CollectionId) -> bool {
        self.collection_tombstones.contains_key(id)
    }

    pub fn clear_collection_tombstones<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a CollectionId>,
    ) {
        for id in ids {
            self.collection_tombstones.remove(id);
        }
    }

    // --- Deltas ---

    /// Full-state delta: every live item, every tombstone, every collection
    /// (tombstoned collections included, with no items).
    pub fn to_delta(&self) -> SyncDelta {
        let live = self.collections.values().map(|c| {
            let items = self.items_in(&c.id).cloned().collect();
            CollectionEntry::new(c.clone(), items)
        });
        let dead = self
            .collection_tombstones
            .values()
            .map(|c| CollectionEntry::new(c.clone(), Vec::new()));

        SyncDelta {
            items: self.items.values().cloned().collect(),
            deleted: self.tombstones.values().cloned().collect(),
            collections: live.chain(dead).collect(),
        }
    }
}

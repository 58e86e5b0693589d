//! Versioned, tombstone-capable records: [`Item`] (a task) and [`Collection`] (a list).
//!
//! Every setter stamps `last_modified` before returning, even when the new
//! value equals the old one, and hands back a change value describing what
//! happened. Records never reach out to the application to announce changes;
//! the caller routes the returned change wherever it needs to go.

use crate::ids::{CollectionId, ItemId, Timestamp};
use serde::{Deserialize, Serialize};

/// A task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub completed: bool,
    pub deleted: bool,
    pub last_modified: Timestamp,
    /// Owning collection, or `None` for the unfiled set.
    pub collection_id: Option<CollectionId>,
}

/// Which field of an item a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemField {
    Created,
    Title,
    Completed,
    Deleted,
}

/// Result of a local item mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChange {
    pub id: ItemId,
    pub field: ItemField,
    pub last_modified: Timestamp,
}

impl Item {
    /// Create a fresh, non-completed, non-deleted item.
    pub fn new(title: impl Into<String>, collection_id: Option<CollectionId>) -> Self {
        Self {
            id: ItemId::generate(),
            title: title.into(),
            completed: false,
            deleted: false,
            last_modified: Timestamp::now(),
            collection_id,
        }
    }

    /// Build an item with explicit fields. Used when decoding peers' records
    /// and in tests.
    pub fn with_fields(
        id: impl Into<ItemId>,
        title: impl Into<String>,
        completed: bool,
        last_modified: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            completed,
            deleted: false,
            last_modified,
            collection_id: None,
        }
    }

    pub fn in_collection(mut self, collection_id: CollectionId) -> Self {
        self.collection_id = Some(collection_id);
        self
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> ItemChange {
        self.title = title.into();
        self.touch(ItemField::Title)
    }

    pub fn set_completed(&mut self, completed: bool) -> ItemChange {
        self.completed = completed;
        self.touch(ItemField::Completed)
    }

    pub fn set_deleted(&mut self, deleted: bool) -> ItemChange {
        self.deleted = deleted;
        self.touch(ItemField::Deleted)
    }

    /// Change value describing this item's creation.
    pub fn created(&self) -> ItemChange {
        ItemChange {
            id: self.id.clone(),
            field: ItemField::Created,
            last_modified: self.last_modified,
        }
    }

    fn touch(&mut self, field: ItemField) -> ItemChange {
        self.last_modified = Timestamp::advance(self.last_modified);
        ItemChange {
            id: self.id.clone(),
            field,
            last_modified: self.last_modified,
        }
    }
}

/// A named list of items.
///
/// Membership is not stored here: items carry `collection_id` and the
/// collection's contents are reconstructed by joining on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub deleted: bool,
    pub last_modified: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectionField {
    Created,
    Name,
    Deleted,
}

/// Result of a local collection mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChange {
    pub id: CollectionId,
    pub field: CollectionField,
    pub last_modified: Timestamp,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CollectionId::generate(),
            name: name.into(),
            deleted: false,
            last_modified: Timestamp::now(),
        }
    }

    pub fn with_fields(
        id: impl Into<CollectionId>,
        name: impl Into<String>,
        last_modified: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            deleted: false,
            last_modified,
        }
    }

    pub fn rename(&mut self, name: impl Into<String>) -> CollectionChange {
        self.name = name.into();
        self.touch(CollectionField::Name)
    }

    pub fn set_deleted(&mut self, deleted: bool) -> CollectionChange {
        self.deleted = deleted;
        self.touch(CollectionField::Deleted)
    }

    pub fn created(&self) -> CollectionChange {
        CollectionChange {
            id: self.id.clone(),
            field: CollectionField::Created,
            last_modified: self.last_modified,
        }
    }

    fn touch(&mut self, field: CollectionField) -> CollectionChange {
        self.last_modified = Timestamp::advance(self.last_modified);
        CollectionChange {
            id: self.id.clone(),
            field,
            last_modified: self.last_modified,
        }
    }
}

/// Whether `title` is already used by one of `items` (case-insensitive).
pub fn title_taken<'a>(items: impl IntoIterator<Item = &'a Item>, title: &str) -> bool {
    let wanted = title.to_lowercase();
    items
        .into_iter()
        .any(|item| item.title.to_lowercase() == wanted)
}

/// Whether a non-deleted collection already has exactly this name.
pub fn name_taken<'a>(
    collections: impl IntoIterator<Item = &'a Collection>,
    name: &str,
) -> bool {
    collections
        .into_iter()
        .any(|c| !c.deleted && c.name == name)
}

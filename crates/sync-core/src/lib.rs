//! tasksync-core: shared replication engine for an offline-first task list.
//!
//! This crate provides:
//! - The record model (items, collections, timestamps, tombstones)
//! - The replica state and the Sync Delta built from it
//! - The merge engine run by both the client and the server
//! - The versioned wire codec and the event bus

pub mod delta;
pub mod events;
pub mod ids;
pub mod merge;
pub mod protocol;
pub mod record;
pub mod replica;
pub mod user_id;

pub use delta::{CollectionEntry, SyncDelta};
pub use events::{
    ErrorSource, EventBus, Mutation, ReplicaCounts, Subscription, SyncEvent, SyncStatus,
};
pub use ids::{CollectionId, ItemId, Timestamp};
pub use merge::{reconcile, MergeReport};
pub use protocol::{decode_delta, encode_delta, CodecError, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
pub use record::{
    name_taken, title_taken, Collection, CollectionChange, CollectionField, Item, ItemChange,
    ItemField,
};
pub use replica::ReplicaState;
pub use user_id::{UserId, UserIdError, MAX_USER_ID_LEN};

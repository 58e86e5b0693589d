//! Event infrastructure for the replication engine.
//!
//! The engine never calls into a presentation layer directly. It publishes
//! [`SyncEvent`]s on an [`EventBus`]; whatever renders the task list
//! subscribes and refreshes itself.

use crate::ids::Timestamp;
use crate::merge::MergeReport;
use crate::record::{CollectionChange, ItemChange};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// A local mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Mutation {
    Item(ItemChange),
    Collection(CollectionChange),
}

/// Sizes of the replica after a change, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaCounts {
    pub uncompleted: usize,
    pub completed: usize,
    pub collections: usize,
    pub tombstones: usize,
}

/// Connection status shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether the last exchange with the server succeeded.
    pub online: bool,
    pub sync_enabled: bool,
    pub last_sync: Option<Timestamp>,
    pub last_error: Option<String>,
}

/// Which part of the engine reported an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorSource {
    Load,
    Save,
    Push,
    Pull,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A local command changed the replica.
    Mutated { mutation: Mutation },
    /// A pulled delta changed the replica. Not emitted for no-op merges.
    SyncApplied {
        report: MergeReport,
        counts: ReplicaCounts,
    },
    /// The server accepted a pushed delta.
    Pushed {
        items: usize,
        tombstones: usize,
    },
    Error {
        source: ErrorSource,
        message: String,
    },
    StatusChanged(SyncStatus),
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn emit(&self, event: SyncEvent) {
        // Snapshot the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_subscribers_receive_events() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = bus.subscribe(move |event| {
            if let SyncEvent::Pushed { items, .. } = event {
                sink.lock().unwrap().push(items);
            }
        });

        bus.emit(SyncEvent::Pushed {
            items: 3,
            tombstones: 0,
        });
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(SyncEvent::StatusChanged(SyncStatus::default()));
        drop(sub);
        bus.emit(SyncEvent::StatusChanged(SyncStatus::default()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SyncEvent::Error {
            source: ErrorSource::Pull,
            message: "connection refused".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["source"], "pull");
    }
}

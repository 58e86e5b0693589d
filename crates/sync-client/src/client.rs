//! SyncClient: the client replica, its command handlers and sync cycles.
//!
//! Every local command validates its input, applies the mutation to the
//! replica, marks the state dirty for both the store and the server, and
//! publishes a [`SyncEvent::Mutated`]. The push and pull cycles are driven by
//! the scheduler (or called directly by one-shot commands) and never block
//! local mutations: the replica lock is only held for in-memory work, never
//! across network I/O.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tasksync_core::{
    name_taken, reconcile, title_taken, Collection, CollectionId, ErrorSource, EventBus, Item,
    ItemId, MergeReport, Mutation, ReplicaCounts, ReplicaState, SyncDelta, SyncEvent, SyncStatus,
    Timestamp, UserId,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::store::{LocalStore, StoreError};
use crate::transport::{with_retry, RetryPolicy, SyncTransport, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Title must not be empty")]
    EmptyTitle,

    #[error("Collection name must not be empty")]
    EmptyName,

    #[error("An item titled {0:?} already exists here")]
    DuplicateTitle(String),

    #[error("A collection named {0:?} already exists")]
    DuplicateName(String),

    #[error("Unknown item {0}")]
    UnknownItem(ItemId),

    #[error("Unknown collection {0}")]
    UnknownCollection(CollectionId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// What a push or pull cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Sync disabled, or the same direction was already in flight.
    Skipped,
    /// Nothing to push.
    Idle,
    Pushed,
    Pulled(MergeReport),
}

struct ClientState {
    replica: ReplicaState,
    needs_save: bool,
    needs_push: bool,
    /// Bumped on every local mutation.
    generation: u64,
    /// Informational only: pushes always carry the full state.
    changed_items: BTreeSet<ItemId>,
    changed_collections: BTreeSet<CollectionId>,
}

impl ClientState {
    fn new(replica: ReplicaState) -> Self {
        Self {
            replica,
            needs_save: false,
            needs_push: false,
            generation: 0,
            changed_items: BTreeSet::new(),
            changed_collections: BTreeSet::new(),
        }
    }

    fn record(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Item(change) => {
                self.changed_items.insert(change.id.clone());
            }
            Mutation::Collection(change) => {
                self.changed_collections.insert(change.id.clone());
            }
        }
        self.needs_save = true;
        self.needs_push = true;
        self.generation += 1;
    }

    fn counts(&self) -> ReplicaCounts {
        ReplicaCounts {
            uncompleted: self.replica.uncompleted().count(),
            completed: self.replica.completed().count(),
            collections: self.replica.collections().count(),
            tombstones: self.replica.tombstones().count(),
        }
    }
}

/// Clears an in-flight flag when the cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncClient {
    user: UserId,
    config: ClientConfig,
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    retry: RetryPolicy,
    events: Arc<EventBus>,
    state: Mutex<ClientState>,
    status: Mutex<SyncStatus>,
    sync_enabled: AtomicBool,
    push_in_flight: AtomicBool,
    pull_in_flight: AtomicBool,
}

impl SyncClient {
    /// Load the user's local replica and prepare the client.
    ///
    /// A load failure is returned: starting from an empty replica would
    /// overwrite the unreadable file on the next save.
    pub fn open(
        config: ClientConfig,
        user: UserId,
        transport: Arc<dyn SyncTransport>,
    ) -> Result<Self> {
        let store = LocalStore::new(&config.data_dir, &user);
        let replica = store
            .load()
            .inspect_err(|e| error!("Failed to load local data: {}", e))?
            .unwrap_or_default();

        let client = Self {
            retry: config.retry_policy(),
            sync_enabled: AtomicBool::new(config.sync_enabled),
            status: Mutex::new(SyncStatus {
                online: false,
                sync_enabled: config.sync_enabled,
                last_sync: None,
                last_error: None,
            }),
            state: Mutex::new(ClientState::new(replica)),
            events: Arc::new(EventBus::new()),
            user,
            config,
            store,
            transport,
            push_in_flight: AtomicBool::new(false),
            pull_in_flight: AtomicBool::new(false),
        };

        if let Some(name) = client.config.default_collection.clone() {
            let exists = client.lock().replica.collection_named(&name).is_some();
            if !exists {
                info!("Creating default collection {:?}", name);
                client.create_collection(&name)?;
            }
        }

        Ok(client)
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_status(&self) -> MutexGuard<'_, SyncStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ==================== Views ====================

    /// Copy of the current replica.
    pub fn snapshot(&self) -> ReplicaState {
        self.lock().replica.clone()
    }

    pub fn counts(&self) -> ReplicaCounts {
        self.lock().counts()
    }

    pub fn status(&self) -> SyncStatus {
        self.lock_status().clone()
    }

    /// Whether there are unsaved local changes.
    pub fn needs_save(&self) -> bool {
        self.lock().needs_save
    }

    /// Whether there are local changes the server has not acknowledged.
    pub fn needs_push(&self) -> bool {
        self.lock().needs_push
    }

    /// Ids touched since the last acknowledged push.
    pub fn changed_items(&self) -> Vec<ItemId> {
        self.lock().changed_items.iter().cloned().collect()
    }

    // ==================== Commands ====================

    /// Add an item, unfiled or inside `collection`.
    pub fn add_item(&self, title: &str, collection: Option<&CollectionId>) -> Result<ItemId> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ClientError::EmptyTitle);
        }

        let (id, mutation) = {
            let mut state = self.lock();
            if let Some(cid) = collection {
                if state.replica.collection(cid).is_none() {
                    return Err(ClientError::UnknownCollection(cid.clone()));
                }
            }
            if title_taken(state.replica.siblings(collection), title) {
                return Err(ClientError::DuplicateTitle(title.to_string()));
            }

            let item = Item::new(title, collection.cloned());
            let id = item.id.clone();
            let mutation = Mutation::Item(item.created());
            state.replica.insert_item(item);
            state.record(&mutation);
            (id, mutation)
        };

        debug!("Added item {} ({:?})", id, title);
        self.publish(mutation);
        Ok(id)
    }

    pub fn set_title(&self, id: &ItemId, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ClientError::EmptyTitle);
        }

        let mutation = {
            let mut state = self.lock();
            let owner = state
                .replica
                .item(id)
                .ok_or_else(|| ClientError::UnknownItem(id.clone()))?
                .collection_id
                .clone();
            let others = state
                .replica
                .siblings(owner.as_ref())
                .filter(|i| &i.id != id);
            if title_taken(others, title) {
                return Err(ClientError::DuplicateTitle(title.to_string()));
            }

            let change = state
                .replica
                .item_mut(id)
                .ok_or_else(|| ClientError::UnknownItem(id.clone()))?
                .set_title(title);
            let mutation = Mutation::Item(change);
            state.record(&mutation);
            mutation
        };

        self.publish(mutation);
        Ok(())
    }

    pub fn set_completed(&self, id: &ItemId, completed: bool) -> Result<()> {
        let mutation = {
            let mut state = self.lock();
            let change = state
                .replica
                .item_mut(id)
                .ok_or_else(|| ClientError::UnknownItem(id.clone()))?
                .set_completed(completed);
            let mutation = Mutation::Item(change);
            state.record(&mutation);
            mutation
        };

        self.publish(mutation);
        Ok(())
    }

    /// Delete an item. It stays as a tombstone until a push is acknowledged.
    pub fn delete_item(&self, id: &ItemId) -> Result<()> {
        let mutation = {
            let mut state = self.lock();
            let change = state
                .replica
                .tombstone_item(id)
                .ok_or_else(|| ClientError::UnknownItem(id.clone()))?;
            let mutation = Mutation::Item(change);
            state.record(&mutation);
            mutation
        };

        debug!("Deleted item {}", id);
        self.publish(mutation);
        Ok(())
    }

    pub fn create_collection(&self, name: &str) -> Result<CollectionId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::EmptyName);
        }

        let (id, mutation) = {
            let mut state = self.lock();
            if name_taken(state.replica.collections(), name) {
                return Err(ClientError::DuplicateName(name.to_string()));
            }

            let collection = Collection::new(name);
            let id = collection.id.clone();
            let mutation = Mutation::Collection(collection.created());
            state.replica.insert_collection(collection);
            state.record(&mutation);
            (id, mutation)
        };

        debug!("Created collection {} ({:?})", id, name);
        self.publish(mutation);
        Ok(id)
    }

    pub fn rename_collection(&self, id: &CollectionId, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::EmptyName);
        }

        let mutation = {
            let mut state = self.lock();
            if state.replica.collection(id).is_none() {
                return Err(ClientError::UnknownCollection(id.clone()));
            }
            if name_taken(state.replica.collections().filter(|c| &c.id != id), name) {
                return Err(ClientError::DuplicateName(name.to_string()));
            }

            let change = state
                .replica
                .collection_mut(id)
                .ok_or_else(|| ClientError::UnknownCollection(id.clone()))?
                .rename(name);
            let mutation = Mutation::Collection(change);
            state.record(&mutation);
            mutation
        };

        self.publish(mutation);
        Ok(())
    }

    /// Delete a collection together with the items it owns.
    pub fn delete_collection(&self, id: &CollectionId) -> Result<()> {
        let mutations = {
            let mut state = self.lock();
            let (change, item_changes) = state
                .replica
                .tombstone_collection(id)
                .ok_or_else(|| ClientError::UnknownCollection(id.clone()))?;

            let mut mutations = vec![Mutation::Collection(change)];
            mutations.extend(item_changes.into_iter().map(Mutation::Item));
            for mutation in &mutations {
                state.record(mutation);
            }
            mutations
        };

        debug!("Deleted collection {} ({} items)", id, mutations.len() - 1);
        for mutation in mutations {
            self.publish(mutation);
        }
        Ok(())
    }

    fn publish(&self, mutation: Mutation) {
        self.events.emit(SyncEvent::Mutated { mutation });
    }

    // ==================== Persistence ====================

    /// Write the replica to the local store.
    ///
    /// A silent (autosave) failure is only logged; otherwise the failure is
    /// published as an error event and returned.
    pub fn save(&self, silent: bool) -> Result<()> {
        let (replica, generation) = {
            let state = self.lock();
            (state.replica.clone(), state.generation)
        };

        match self.store.save(&replica) {
            Ok(()) => {
                let mut state = self.lock();
                if state.generation == generation {
                    state.needs_save = false;
                }
                Ok(())
            }
            Err(e) if silent => {
                warn!("Autosave failed: {}", e);
                Ok(())
            }
            Err(e) => {
                error!("Save failed: {}", e);
                self.events.emit(SyncEvent::Error {
                    source: ErrorSource::Save,
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Save silently if there are unsaved changes.
    pub fn autosave_tick(&self) {
        if self.needs_save() {
            // Silent saves never return an error.
            let _ = self.save(true);
        }
    }

    // ==================== Sync ====================

    pub fn sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::Acquire)
    }

    pub fn set_sync_enabled(&self, enabled: bool) {
        self.sync_enabled.store(enabled, Ordering::Release);
        info!("Sync {}", if enabled { "enabled" } else { "disabled" });
        self.update_status(|status| {
            status.sync_enabled = enabled;
            if !enabled {
                status.online = false;
            }
        });
    }

    /// Push the full local state if anything changed since the last
    /// acknowledged push.
    pub async fn push_cycle(&self) -> Result<CycleOutcome> {
        if !self.sync_enabled() {
            return Ok(CycleOutcome::Skipped);
        }
        let Some(_guard) = InFlight::acquire(&self.push_in_flight) else {
            debug!("Push already in flight, skipping tick");
            return Ok(CycleOutcome::Skipped);
        };

        let (delta, generation) = {
            let state = self.lock();
            if !state.needs_push {
                return Ok(CycleOutcome::Idle);
            }
            (state.replica.to_delta(), state.generation)
        };

        let transport = Arc::clone(&self.transport);
        let user = &self.user;
        let result = with_retry(&self.retry, "push", || transport.push(user, &delta)).await;

        match result {
            Ok(()) => {
                self.acknowledge_push(&delta, generation);
                info!(
                    "Pushed {} items and {} tombstones",
                    delta.items.len(),
                    delta.deleted.len()
                );
                self.events.emit(SyncEvent::Pushed {
                    items: delta.items.len(),
                    tombstones: delta.deleted.len(),
                });
                self.mark_online();
                Ok(CycleOutcome::Pushed)
            }
            Err(e) => {
                self.report_sync_failure(ErrorSource::Push, &e);
                Err(e.into())
            }
        }
    }

    fn acknowledge_push(&self, sent: &SyncDelta, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.needs_push = false;
            state.changed_items.clear();
            state.changed_collections.clear();
        }

        // Only the tombstones the server has now seen.
        let sent_items = sent.deleted.iter().map(|i| &i.id);
        let sent_collections = sent
            .collections
            .iter()
            .filter(|e| e.collection.deleted)
            .map(|e| &e.collection.id);
        let before = state.replica.tombstones().count() + state.replica.collection_tombstones().count();
        state.replica.clear_tombstones(sent_items);
        state.replica.clear_collection_tombstones(sent_collections);
        let after = state.replica.tombstones().count() + state.replica.collection_tombstones().count();
        if after != before {
            state.needs_save = true;
        }
    }

    /// Fetch the server snapshot and merge it into the local replica.
    pub async fn pull_cycle(&self) -> Result<CycleOutcome> {
        if !self.sync_enabled() {
            return Ok(CycleOutcome::Skipped);
        }
        let Some(_guard) = InFlight::acquire(&self.pull_in_flight) else {
            debug!("Pull already in flight, skipping tick");
            return Ok(CycleOutcome::Skipped);
        };

        let transport = Arc::clone(&self.transport);
        let user = &self.user;
        let result = with_retry(&self.retry, "fetch", || transport.fetch(user)).await;

        let remote = match result {
            Ok(remote) => remote,
            Err(e) => {
                self.report_sync_failure(ErrorSource::Pull, &e);
                return Err(e.into());
            }
        };

        let (report, counts) = {
            let mut state = self.lock();
            let report = reconcile(&mut state.replica, &remote);
            if report.changed_state() {
                state.needs_save = true;
            }
            (report, state.counts())
        };
        self.mark_online();

        if report.changed_state() {
            self.autosave_tick();
        }
        if report.is_empty() {
            debug!("Pull brought no changes");
        } else {
            info!("Pull applied {} changes", report.change_count());
            self.events.emit(SyncEvent::SyncApplied {
                report: report.clone(),
                counts,
            });
        }
        Ok(CycleOutcome::Pulled(report))
    }

    fn report_sync_failure(&self, source: ErrorSource, e: &TransportError) {
        error!("{:?} failed after {} attempts: {}", source, self.retry.max_attempts, e);
        let message = e.to_string();
        self.update_status(|status| {
            status.online = false;
            status.last_error = Some(message.clone());
        });
        self.events.emit(SyncEvent::Error { source, message });
    }

    fn mark_online(&self) {
        self.update_status(|status| {
            status.online = true;
            status.last_sync = Some(Timestamp::now());
            status.last_error = None;
        });
    }

    /// Apply `f` to the status and publish it if anything but the sync time changed.
    fn update_status(&self, f: impl FnOnce(&mut SyncStatus)) {
        let (changed, snapshot) = {
            let mut status = self.lock_status();
            let before = status.clone();
            f(&mut *status);
            let changed = status.online != before.online
                || status.sync_enabled != before.sync_enabled
                || status.last_error != before.last_error;
            (changed, status.clone())
        };
        if changed {
            self.events.emit(SyncEvent::StatusChanged(snapshot));
        }
    }
}

//! tasksync-client: offline-first task replica with periodic sync.
//!
//! - [`SyncClient`]: command handlers, dirty tracking, push and pull cycles
//! - [`LocalStore`]: the replica's file on disk
//! - [`SyncTransport`] / [`HttpTransport`]: the network half, with retries
//! - [`Scheduler`]: the autosave, push and pull timers

pub mod client;
pub mod config;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use client::{ClientError, CycleOutcome, SyncClient};
pub use config::ClientConfig;
pub use scheduler::Scheduler;
pub use store::{LocalStore, StoreError};
pub use transport::{with_retry, HttpTransport, RetryPolicy, SyncTransport, TransportError};

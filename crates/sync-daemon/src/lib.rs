//! tasksync-daemon library: the partition store and its HTTP router.
//!
//! The binary is a thin wrapper around [`router`]; integration tests and the
//! client's end-to-end tests mount the same router on a loopback listener.

pub mod partition;
pub mod server;

pub use partition::PartitionStore;
pub use server::{router, AppState};

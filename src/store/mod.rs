//! Ambient storage for the moderation core.
//!
//! Three concerns live here:
//!
//! - [`TtlCache`] - decaying in-process state (idempotency window, violation
//!   counters, admin lists, config snapshots)
//! - [`RowStore`] - durable per-user rows (mute escalation levels)
//! - [`QueueStore`] - the single durable slot holding the deferred action list
//!
//! The dispatcher receives these as explicitly passed-in handles rather than
//! ambient globals, so tests can substitute in-memory doubles.

pub mod fsync;
pub mod queue_slot;
pub mod rows;
pub mod ttl_cache;

use thiserror::Error;

pub use queue_slot::{FileQueueStore, MemoryQueueStore, QueueStore};
pub use rows::{FileRowStore, MemoryRowStore, MuteLevelRow, RowStore};
pub use ttl_cache::TtlCache;

/// Errors from the durable store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The in-process lock guarding the backend was poisoned.
    #[error("store lock poisoned")]
    Poisoned,
}

//! Idempotency gate for webhook deliveries.
//!
//! The platform delivers updates at least once; redeliveries reuse the update
//! id. The gate remembers ids for a trailing window (default 600 seconds) and
//! signals "duplicate, drop" for anything seen within it.
//!
//! The gate fails open: if the cache cannot be consulted (lock contention),
//! the update is treated as never-seen. Duplicates may then leak through,
//! which is acceptable since downstream operations are mostly idempotent or
//! cheap to repeat.

use std::sync::Mutex;

use chrono::Duration;
use tracing::{debug, warn};

use crate::store::TtlCache;
use crate::types::UpdateId;

/// Default idempotency window.
pub const DEFAULT_WINDOW_SECS: i64 = 600;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Not seen within the window; the id is now recorded.
    Fresh,
    /// Seen within the window; drop the update.
    Duplicate,
}

/// Rejects duplicate update identifiers within a trailing window.
#[derive(Debug)]
pub struct IdempotencyGate {
    seen: Mutex<TtlCache<UpdateId, ()>>,
}

impl IdempotencyGate {
    /// Creates a gate with the given window.
    pub fn new(window: Duration) -> Self {
        IdempotencyGate {
            seen: Mutex::new(TtlCache::new(window)),
        }
    }

    /// Creates a gate with the default 600-second window.
    pub fn with_default_window() -> Self {
        Self::new(Duration::seconds(DEFAULT_WINDOW_SECS))
    }

    /// Checks whether `id` was seen within the window, recording it if not.
    pub fn check_and_record(&self, id: UpdateId) -> GateDecision {
        let mut seen = match self.seen.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Fail open rather than blocking the webhook response.
                warn!(update_id = %id, "idempotency cache contended, failing open");
                return GateDecision::Fresh;
            }
        };

        if seen.contains(&id) {
            debug!(update_id = %id, "duplicate update id within window");
            return GateDecision::Duplicate;
        }

        seen.insert(id, ());
        GateDecision::Fresh
    }

    /// Reclaims expired slots. Invoked from the periodic sweep.
    pub fn purge_expired(&self) -> usize {
        match self.seen.try_lock() {
            Ok(mut seen) => seen.purge_expired(),
            Err(_) => 0,
        }
    }
}

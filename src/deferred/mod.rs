//! The deferred action queue.
//!
//! Time-delayed side effects (delete a notice later, expire a challenge) are
//! persisted as a single ordered list in a durable slot and executed by a
//! periodic sweep. Append and sweep both do read-modify-write of the whole
//! list under one async lock with a bounded wait; execution of due entries
//! happens outside the lock so a slow API call never blocks appends.
//!
//! A corrupt slot (parse failure) is discarded wholesale. Losing pending
//! deletions is preferred over a queue that blocks every future sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::store::{QueueStore, StoreError};
use crate::types::{ChatId, MessageId, UserId};

/// Bound on waiting for the queue lock.
const LOCK_WAIT: std::time::Duration = std::time::Duration::from_secs(3);

/// What a deferred action does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Delete a message (expired notices, timed cleanup).
    DeleteMessage { chat: ChatId, message: MessageId },

    /// Fire the challenge timeout for a joiner. A no-op if the challenge
    /// already left `pending`.
    ExpireChallenge {
        chat: ChatId,
        user: UserId,
        prompt: MessageId,
    },
}

/// One persisted, time-delayed side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredAction {
    pub kind: ActionKind,
    pub due_at: DateTime<Utc>,
}

impl DeferredAction {
    pub fn new(kind: ActionKind, due_at: DateTime<Utc>) -> Self {
        DeferredAction { kind, due_at }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at
    }
}

/// Errors from queue persistence.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The durable queue over a [`QueueStore`] slot.
pub struct DeferredQueue {
    store: Box<dyn QueueStore>,
    lock: tokio::sync::Mutex<()>,
}

impl DeferredQueue {
    pub fn new(store: Box<dyn QueueStore>) -> Self {
        DeferredQueue {
            store,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Appends an action to the persisted list.
    ///
    /// On lock timeout the read-modify-write proceeds without exclusion. A
    /// racing sweep may then lose this entry, which beats stalling the
    /// webhook response.
    pub async fn append(&self, action: DeferredAction) -> Result<(), QueueError> {
        let guard = tokio::time::timeout(LOCK_WAIT, self.lock.lock()).await;
        if guard.is_err() {
            warn!("queue lock wait timed out, appending without exclusion");
        }

        let mut actions = self.load();
        actions.push(action);
        self.save(&actions)
    }

    /// Removes and returns every entry due as of `now`, persisting the rest.
    ///
    /// The caller executes the returned actions outside the queue lock.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<DeferredAction>, QueueError> {
        let guard = tokio::time::timeout(LOCK_WAIT, self.lock.lock()).await;
        if guard.is_err() {
            warn!("queue lock wait timed out, sweeping without exclusion");
        }

        let actions = self.load();
        let (due, pending): (Vec<_>, Vec<_>) =
            actions.into_iter().partition(|a| a.is_due(now));

        if !due.is_empty() {
            self.save(&pending)?;
        }
        Ok(due)
    }

    /// Number of persisted entries (diagnostics and tests).
    pub async fn len(&self) -> usize {
        let _guard = tokio::time::timeout(LOCK_WAIT, self.lock.lock()).await;
        self.load().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn load(&self) -> Vec<DeferredAction> {
        let bytes = match self.store.load() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "queue slot unreadable, treating as empty");
                return Vec::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(error = %e, "corrupt queue slot discarded");
                Vec::new()
            }
        }
    }

    fn save(&self, actions: &[DeferredAction]) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(actions).map_err(StoreError::from)?;
        self.store.save(&bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQueueStore;
    use chrono::Duration;

    fn delete_at(message: i64, due_at: DateTime<Utc>) -> DeferredAction {
        DeferredAction::new(
            ActionKind::DeleteMessage {
                chat: ChatId(-100),
                message: MessageId(message),
            },
            due_at,
        )
    }

    #[tokio::test]
    async fn append_then_take_all_due() {
        let queue = DeferredQueue::new(Box::new(MemoryQueueStore::new()));
        let now = Utc::now();
        for i in 0..5 {
            queue.append(delete_at(i, now - Duration::seconds(1))).await.unwrap();
        }

        let due = queue.take_due(now).await.unwrap();
        assert_eq!(due.len(), 5);
        assert!(queue.is_empty().await);

        // A second sweep finds nothing: no action fires twice.
        assert!(queue.take_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn not_yet_due_entries_stay() {
        let queue = DeferredQueue::new(Box::new(MemoryQueueStore::new()));
        let now = Utc::now();
        queue.append(delete_at(1, now - Duration::seconds(1))).await.unwrap();
        queue.append(delete_at(2, now + Duration::seconds(60))).await.unwrap();

        let due = queue.take_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(matches!(
            due[0].kind,
            ActionKind::DeleteMessage { message: MessageId(1), .. }
        ));
        assert_eq!(queue.len().await, 1);

        // The survivor fires once its deadline passes.
        let due = queue.take_due(now + Duration::seconds(61)).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn due_exactly_at_deadline() {
        let now = Utc::now();
        assert!(delete_at(1, now).is_due(now));
        assert!(!delete_at(1, now + Duration::seconds(1)).is_due(now));
    }

    #[tokio::test]
    async fn corrupt_slot_is_discarded_wholesale() {
        let store = MemoryQueueStore::new();
        crate::store::QueueStore::save(&store, b"{definitely not json").unwrap();

        let queue = DeferredQueue::new(Box::new(store));
        assert!(queue.take_due(Utc::now()).await.unwrap().is_empty());

        // The queue keeps working after the discard.
        let now = Utc::now();
        queue.append(delete_at(1, now)).await.unwrap();
        assert_eq!(queue.take_due(now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn order_is_preserved_for_due_entries() {
        let queue = DeferredQueue::new(Box::new(MemoryQueueStore::new()));
        let now = Utc::now();
        for i in 0..3 {
            queue
                .append(delete_at(i, now - Duration::seconds(3 - i)))
                .await
                .unwrap();
        }
        let due = queue.take_due(now).await.unwrap();
        let ids: Vec<i64> = due
            .iter()
            .map(|a| match a.kind {
                ActionKind::DeleteMessage { message, .. } => message.0,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}

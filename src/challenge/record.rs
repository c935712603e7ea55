//! Challenge record state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, MessageId, UserId};

/// Lifecycle of a join challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    /// Waiting for the button press.
    Pending,
    /// The joiner pressed their button in time.
    Passed,
    /// The deadline fired first.
    Expired,
    /// The joiner left or was removed before answering.
    Failed,
}

impl ChallengeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChallengeStatus::Pending)
    }
}

/// One outstanding (or recently finished) challenge for a (chat, user) pair.
///
/// At most one non-terminal record exists per pair; terminal records linger
/// in the TTL cache briefly so late button presses and timeouts can tell
/// "already passed" from "never challenged".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub chat: ChatId,
    pub user: UserId,

    /// The message carrying the challenge button.
    pub prompt: MessageId,

    pub status: ChallengeStatus,
    pub created_at: DateTime<Utc>,
}

impl ChallengeRecord {
    pub fn pending(chat: ChatId, user: UserId, prompt: MessageId, now: DateTime<Utc>) -> Self {
        ChallengeRecord {
            chat,
            user,
            prompt,
            status: ChallengeStatus::Pending,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ChallengeStatus::Pending.is_terminal());
        assert!(ChallengeStatus::Passed.is_terminal());
        assert!(ChallengeStatus::Expired.is_terminal());
        assert!(ChallengeStatus::Failed.is_terminal());
    }
}

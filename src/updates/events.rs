//! Typed representations of webhook updates.
//!
//! Each variant corresponds to an update kind the moderation core handles:
//!
//! - `member_status_change` - join detection and admin/unmute noise
//! - `message` - subscription enforcement on group messages
//! - `button_press` - challenge and recheck buttons
//! - `join_request` - approval-gated chats

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{CallbackId, ChatId, MemberStatus, MessageId, UpdateId, UserId};

/// The acting user attached to an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The user id. Negative for channels acting as users.
    pub id: UserId,

    /// Whether the platform marks this account as a bot.
    pub is_bot: bool,

    /// Username, when the platform provides one.
    pub username: Option<String>,
}

impl Actor {
    pub fn user(id: impl Into<UserId>) -> Self {
        Actor {
            id: id.into(),
            is_bot: false,
            username: None,
        }
    }

    /// How the user is addressed in notices.
    pub fn mention(&self) -> String {
        match &self.username {
            Some(name) => format!("@{name}"),
            None => format!("user {}", self.id),
        }
    }
}

/// A parsed webhook update.
///
/// Only the kinds the core cares about are represented; the parser returns
/// `None` for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update {
    /// A member's status in a chat changed (join, leave, restrict, promote).
    MemberStatusChange(MemberStatusChange),

    /// A message was posted.
    Message(MessageEvent),

    /// An inline button was pressed.
    ButtonPress(ButtonPress),

    /// A user asked to join an approval-gated chat.
    JoinRequest(JoinRequest),
}

impl Update {
    /// Returns the update identifier used by the idempotency gate.
    pub fn update_id(&self) -> UpdateId {
        match self {
            Update::MemberStatusChange(e) => e.update_id,
            Update::Message(e) => e.update_id,
            Update::ButtonPress(e) => e.update_id,
            Update::JoinRequest(e) => e.update_id,
        }
    }

    /// Returns the chat this update happened in.
    pub fn chat_id(&self) -> ChatId {
        match self {
            Update::MemberStatusChange(e) => e.chat,
            Update::Message(e) => e.chat,
            Update::ButtonPress(e) => e.chat,
            Update::JoinRequest(e) => e.chat,
        }
    }

    /// Returns the acting user.
    ///
    /// For member-status changes this is the member whose status changed,
    /// not the initiator; the distinction matters for real-join detection.
    pub fn actor(&self) -> &Actor {
        match self {
            Update::MemberStatusChange(e) => &e.subject,
            Update::Message(e) => &e.sender,
            Update::ButtonPress(e) => &e.presser,
            Update::JoinRequest(e) => &e.applicant,
        }
    }

    /// Short kind tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Update::MemberStatusChange(_) => "member_status_change",
            Update::Message(_) => "message",
            Update::ButtonPress(_) => "button_press",
            Update::JoinRequest(_) => "join_request",
        }
    }
}

/// A member-status transition in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatusChange {
    pub update_id: UpdateId,
    pub chat: ChatId,

    /// The member whose status changed.
    pub subject: Actor,

    /// Previous status. `None` when the platform had no prior record
    /// (treated as absent).
    pub old_status: Option<MemberStatus>,

    /// New status.
    pub new_status: MemberStatus,

    /// Who initiated the change. `None` is treated as self-initiated for
    /// backward compatibility with payloads that omit the actor.
    pub initiator: Option<UserId>,
}

/// A message posted to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub update_id: UpdateId,
    pub chat: ChatId,
    pub message_id: MessageId,
    pub sender: Actor,

    /// Set when the message was posted on behalf of a channel rather than a
    /// person. Such posts carry a synthetic sender id.
    pub sender_channel: Option<ChatId>,

    /// True for 1:1 chats with the bot.
    pub is_direct: bool,

    pub text: Option<String>,
}

/// An inline button press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPress {
    pub update_id: UpdateId,
    pub chat: ChatId,

    /// The message carrying the button (the challenge prompt or warning).
    pub message_id: MessageId,

    pub presser: Actor,
    pub callback_id: CallbackId,
    pub payload: ButtonPayload,
}

/// A request to join an approval-gated chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub update_id: UpdateId,
    pub chat: ChatId,
    pub applicant: Actor,
}

/// Parsed button payload.
///
/// Payloads embed the user id the button was issued for, so a press by anyone
/// else can be rejected. Wire format: `challenge:<user_id>` and
/// `recheck:<user_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonPayload {
    /// The "I'm not a robot" challenge button.
    ChallengePass { user: UserId },

    /// The "recheck subscription" button on violation warnings.
    RecheckSubscription { user: UserId },

    /// Anything else (stale buttons from older deployments).
    Unknown(String),
}

impl ButtonPayload {
    /// Parses a raw payload string.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(2, ':');
        let tag = parts.next().unwrap_or("");
        let rest = parts.next();
        match (tag, rest.and_then(|r| r.parse::<i64>().ok())) {
            ("challenge", Some(id)) => ButtonPayload::ChallengePass { user: UserId(id) },
            ("recheck", Some(id)) => ButtonPayload::RecheckSubscription { user: UserId(id) },
            _ => ButtonPayload::Unknown(raw.to_string()),
        }
    }

    /// The user id embedded in the payload, if any.
    pub fn embedded_user(&self) -> Option<UserId> {
        match self {
            ButtonPayload::ChallengePass { user } => Some(*user),
            ButtonPayload::RecheckSubscription { user } => Some(*user),
            ButtonPayload::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ButtonPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonPayload::ChallengePass { user } => write!(f, "challenge:{}", user),
            ButtonPayload::RecheckSubscription { user } => write!(f, "recheck:{}", user),
            ButtonPayload::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

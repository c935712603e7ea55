//! Member status and permission types.
//!
//! `MemberStatus` mirrors the platform's chat-member states. The same type
//! serves two purposes: classifying member-status-change updates (join
//! detection) and interpreting get-member-status responses (subscription and
//! admin checks).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A user's membership status within a chat or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Chat owner.
    Creator,
    /// Chat administrator.
    Administrator,
    /// Ordinary member.
    Member,
    /// Member with restricted permissions (muted).
    Restricted,
    /// Not a member (left voluntarily).
    Left,
    /// Banned from the chat.
    Kicked,
}

impl MemberStatus {
    /// Parses the platform's status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creator" => Some(MemberStatus::Creator),
            "administrator" => Some(MemberStatus::Administrator),
            "member" => Some(MemberStatus::Member),
            "restricted" => Some(MemberStatus::Restricted),
            "left" => Some(MemberStatus::Left),
            "kicked" => Some(MemberStatus::Kicked),
            _ => None,
        }
    }

    /// Returns the platform's status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Creator => "creator",
            MemberStatus::Administrator => "administrator",
            MemberStatus::Member => "member",
            MemberStatus::Restricted => "restricted",
            MemberStatus::Left => "left",
            MemberStatus::Kicked => "kicked",
        }
    }

    /// Whether this status counts as being subscribed to a channel.
    ///
    /// Restricted members are still inside the channel, so they count.
    pub fn is_subscribed(&self) -> bool {
        matches!(
            self,
            MemberStatus::Creator
                | MemberStatus::Administrator
                | MemberStatus::Member
                | MemberStatus::Restricted
        )
    }

    /// Whether this status counts as "not in the chat" for join detection.
    pub fn is_absent(&self) -> bool {
        matches!(self, MemberStatus::Left | MemberStatus::Kicked)
    }

    /// Whether this status carries admin rights.
    pub fn is_admin(&self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The permission set applied when restricting a member.
///
/// Only the send-side permissions matter for moderation; info/pin rights stay
/// denied in both presets because ordinary members never hold them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub can_send_messages: bool,
    pub can_send_media: bool,
    pub can_send_polls: bool,
    pub can_send_other: bool,
    pub can_add_web_page_previews: bool,
    pub can_invite_users: bool,
}

impl PermissionSet {
    /// Full mute: nothing allowed.
    pub fn none() -> Self {
        PermissionSet {
            can_send_messages: false,
            can_send_media: false,
            can_send_polls: false,
            can_send_other: false,
            can_add_web_page_previews: false,
            can_invite_users: false,
        }
    }

    /// Everything an ordinary member may do.
    pub fn full() -> Self {
        PermissionSet {
            can_send_messages: true,
            can_send_media: true,
            can_send_polls: true,
            can_send_other: true,
            can_add_web_page_previews: true,
            can_invite_users: true,
        }
    }
}

//! Chat platform API effect types.
//!
//! These types describe Bot API operations as data, without executing them.
//! The moderation core returns effects; the interpreter executes them against
//! the real API (or records them, in tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallbackId, ChatId, MemberStatus, MessageId, PermissionSet, UserId};

/// A keyboard button attached to a sent or edited message.
///
/// `payload` is the callback data delivered back in a button press, in the
/// `challenge:<id>` / `recheck:<id>` wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub payload: String,
}

/// A Bot API effect.
///
/// Effects carry full addressing (chat, message, user) so a single
/// interpreter instance serves every chat the processor moderates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiEffect {
    // ─── messaging ───
    /// Send a text message, optionally with one button row.
    SendMessage {
        chat: ChatId,
        text: String,
        buttons: Vec<Button>,
    },

    /// Replace the text (and buttons) of an existing message.
    EditMessageText {
        chat: ChatId,
        message: MessageId,
        text: String,
        buttons: Vec<Button>,
    },

    /// Delete a message.
    DeleteMessage { chat: ChatId, message: MessageId },

    /// Acknowledge a button press, optionally with a popup only the presser
    /// sees.
    AnswerCallback {
        callback: CallbackId,
        text: Option<String>,
        show_alert: bool,
    },

    // ─── membership ───
    /// Apply a permission set to a member, optionally until a deadline.
    /// A full permission set lifts an earlier restriction.
    RestrictMember {
        chat: ChatId,
        user: UserId,
        permissions: PermissionSet,
        until: Option<DateTime<Utc>>,
    },

    /// Query a user's membership status in a chat or channel.
    GetMemberStatus { chat: ChatId, user: UserId },

    /// List the administrators of a chat.
    GetChatAdministrators { chat: ChatId },

    // ─── join requests ───
    ApproveJoinRequest { chat: ChatId, user: UserId },

    DeclineJoinRequest { chat: ChatId, user: UserId },
}

/// The response to an executed [`ApiEffect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiResponse {
    /// The effect succeeded and carries no data.
    Ok,

    /// Response to `SendMessage`.
    MessageSent { message: MessageId },

    /// Response to `GetMemberStatus`.
    MemberStatus(MemberStatus),

    /// Response to `GetChatAdministrators`.
    Administrators(Vec<UserId>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_serde_is_tagged() {
        let effect = ApiEffect::DeleteMessage {
            chat: ChatId(-100),
            message: MessageId(5),
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["type"], "delete_message");

        let back: ApiEffect = serde_json::from_value(json).unwrap();
        assert_eq!(back, effect);
    }

    #[test]
    fn restrict_with_deadline_roundtrips() {
        let effect = ApiEffect::RestrictMember {
            chat: ChatId(-100),
            user: UserId(7),
            permissions: PermissionSet::none(),
            until: Some(Utc::now()),
        };
        let json = serde_json::to_string(&effect).unwrap();
        let back: ApiEffect = serde_json::from_str(&json).unwrap();
        assert_eq!(back, effect);
    }
}

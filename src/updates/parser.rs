//! Webhook payload parser.
//!
//! Turns a raw JSON update object into a typed [`Update`].
//!
//! # Parsing Strategy
//!
//! 1. Deserialize the envelope (`update_id` plus one kind-specific object)
//! 2. Normalize the kind-specific object into an [`Update`] variant
//! 3. Unknown kinds (edited messages, polls, ...) return `Ok(None)`
//! 4. Malformed payloads return `Err` with details; the server logs and
//!    drops them without surfacing an HTTP error

use serde::Deserialize;
use thiserror::Error;

use crate::types::{CallbackId, ChatId, MemberStatus, MessageId, UpdateId, UserId};

use super::events::{
    Actor, ButtonPayload, ButtonPress, JoinRequest, MemberStatusChange, MessageEvent, Update,
};

/// Error type for payload parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Field has an invalid value (e.g., unknown member status).
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a raw update payload into a typed event.
///
/// Returns `Ok(None)` for update kinds the core does not process, including
/// messages with no identifiable sender.
pub fn parse_update(payload: &[u8]) -> Result<Option<Update>, ParseError> {
    let raw: RawUpdate = serde_json::from_slice(payload)?;
    let update_id = UpdateId(raw.update_id);

    if let Some(member) = raw.chat_member {
        return parse_member_change(update_id, member).map(Some);
    }
    if let Some(message) = raw.message {
        return Ok(parse_message(update_id, message));
    }
    if let Some(callback) = raw.callback_query {
        return Ok(parse_button_press(update_id, callback));
    }
    if let Some(request) = raw.chat_join_request {
        return Ok(Some(Update::JoinRequest(JoinRequest {
            update_id,
            chat: ChatId(request.chat.id),
            applicant: request.from.into_actor(),
        })));
    }

    Ok(None)
}

fn parse_member_change(
    update_id: UpdateId,
    raw: RawChatMemberUpdated,
) -> Result<Update, ParseError> {
    let old_status = raw
        .old_chat_member
        .map(|m| parse_status(&m.status))
        .transpose()?;
    let new_status = parse_status(&raw.new_chat_member.status)?;

    Ok(Update::MemberStatusChange(MemberStatusChange {
        update_id,
        chat: ChatId(raw.chat.id),
        subject: raw.new_chat_member.user.into_actor(),
        old_status,
        new_status,
        initiator: raw.from.map(|u| UserId(u.id)),
    }))
}

fn parse_message(update_id: UpdateId, raw: RawMessage) -> Option<Update> {
    let sender_channel = raw.sender_chat.as_ref().map(|c| ChatId(c.id));

    // Channel posts carry no `from`; synthesize a negative-id actor from the
    // sender chat so the pipeline can log the drop. Truly senderless messages
    // are not actionable.
    let sender = match (raw.from, &raw.sender_chat) {
        (Some(user), _) => user.into_actor(),
        (None, Some(chat)) => Actor {
            id: UserId(chat.id),
            is_bot: false,
            username: None,
        },
        (None, None) => return None,
    };

    Some(Update::Message(MessageEvent {
        update_id,
        chat: ChatId(raw.chat.id),
        message_id: MessageId(raw.message_id),
        sender,
        sender_channel,
        is_direct: raw.chat.kind == "private",
        text: raw.text,
    }))
}

fn parse_button_press(update_id: UpdateId, raw: RawCallbackQuery) -> Option<Update> {
    // A press with no attached message or payload is not actionable
    // (the prompt it belonged to is gone).
    let message = raw.message?;
    let data = raw.data?;

    Some(Update::ButtonPress(ButtonPress {
        update_id,
        chat: ChatId(message.chat.id),
        message_id: MessageId(message.message_id),
        presser: raw.from.into_actor(),
        callback_id: CallbackId(raw.id),
        payload: ButtonPayload::parse(&data),
    }))
}

fn parse_status(s: &str) -> Result<MemberStatus, ParseError> {
    MemberStatus::parse(s).ok_or_else(|| ParseError::InvalidField {
        field: "status",
        value: s.to_string(),
    })
}

// ─── Raw wire structs ───

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    chat_member: Option<RawChatMemberUpdated>,
    #[serde(default)]
    callback_query: Option<RawCallbackQuery>,
    #[serde(default)]
    chat_join_request: Option<RawJoinRequest>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    username: Option<String>,
}

impl RawUser {
    fn into_actor(self) -> Actor {
        Actor {
            id: UserId(self.id),
            is_bot: self.is_bot,
            username: self.username,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i64,
    #[serde(default)]
    from: Option<RawUser>,
    #[serde(default)]
    sender_chat: Option<RawChat>,
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChatMember {
    user: RawUser,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RawChatMemberUpdated {
    chat: RawChat,
    #[serde(default)]
    from: Option<RawUser>,
    #[serde(default)]
    old_chat_member: Option<RawChatMember>,
    new_chat_member: RawChatMember,
}

#[derive(Debug, Deserialize)]
struct RawCallbackQuery {
    id: String,
    from: RawUser,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJoinRequest {
    chat: RawChat,
    from: RawUser,
}

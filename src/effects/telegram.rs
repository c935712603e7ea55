//! HTTP-backed effect interpreter for the Telegram Bot API.
//!
//! Every effect maps to one `POST /bot<token>/<method>` call with a JSON
//! body. The API wraps responses in `{"ok": bool, "result": ..., "description":
//! ...}`; a response with `ok: false` becomes [`TelegramError::Api`].

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use super::api::{ApiEffect, ApiResponse, Button};
use super::interpreter::ApiInterpreter;
use crate::types::{MemberStatus, MessageId, PermissionSet, UserId};

/// Errors from the HTTP interpreter.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered but refused the call.
    #[error("{method} failed: {description}")]
    Api {
        method: &'static str,
        description: String,
    },

    /// The API answered `ok` but the payload did not have the shape the
    /// effect requires.
    #[error("unexpected response shape from {method}")]
    UnexpectedShape { method: &'static str },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

#[derive(Debug, Deserialize)]
struct AdminEntry {
    user: AdminUser,
}

#[derive(Debug, Deserialize)]
struct AdminUser {
    id: i64,
}

/// The production interpreter: executes effects against api.telegram.org.
#[derive(Debug, Clone)]
pub struct TelegramInterpreter {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramInterpreter {
    pub fn new(token: &str) -> Self {
        Self::with_base_url("https://api.telegram.org", token)
    }

    /// Points the interpreter at a non-default API host (tests, local Bot API
    /// servers).
    pub fn with_base_url(base_url: &str, token: &str) -> Self {
        TelegramInterpreter {
            client: reqwest::Client::new(),
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
        }
    }

    async fn call(
        &self,
        method: &'static str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TelegramError> {
        debug!(method, "calling bot api");
        let envelope: Envelope = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await
            .map_err(|source| TelegramError::Transport { method, source })?
            .json()
            .await
            .map_err(|source| TelegramError::Transport { method, source })?;

        if !envelope.ok {
            return Err(TelegramError::Api {
                method,
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }
        Ok(envelope.result)
    }
}

fn keyboard_markup(buttons: &[Button]) -> serde_json::Value {
    let row: Vec<_> = buttons
        .iter()
        .map(|b| json!({"text": b.text, "callback_data": b.payload}))
        .collect();
    json!({"inline_keyboard": [row]})
}

fn permissions_body(permissions: &PermissionSet) -> serde_json::Value {
    json!({
        "can_send_messages": permissions.can_send_messages,
        "can_send_audios": permissions.can_send_media,
        "can_send_documents": permissions.can_send_media,
        "can_send_photos": permissions.can_send_media,
        "can_send_videos": permissions.can_send_media,
        "can_send_video_notes": permissions.can_send_media,
        "can_send_voice_notes": permissions.can_send_media,
        "can_send_polls": permissions.can_send_polls,
        "can_send_other_messages": permissions.can_send_other,
        "can_add_web_page_previews": permissions.can_add_web_page_previews,
        "can_invite_users": permissions.can_invite_users,
    })
}

impl ApiInterpreter for TelegramInterpreter {
    type Error = TelegramError;

    async fn interpret(&self, effect: ApiEffect) -> Result<ApiResponse, TelegramError> {
        match effect {
            ApiEffect::SendMessage {
                chat,
                text,
                buttons,
            } => {
                let mut body = json!({"chat_id": chat, "text": text});
                if !buttons.is_empty() {
                    body["reply_markup"] = keyboard_markup(&buttons);
                }
                let result = self.call("sendMessage", body).await?;
                let sent: SentMessage = serde_json::from_value(result)
                    .map_err(|_| TelegramError::UnexpectedShape {
                        method: "sendMessage",
                    })?;
                Ok(ApiResponse::MessageSent {
                    message: MessageId(sent.message_id),
                })
            }

            ApiEffect::EditMessageText {
                chat,
                message,
                text,
                buttons,
            } => {
                let mut body = json!({
                    "chat_id": chat,
                    "message_id": message,
                    "text": text,
                });
                if !buttons.is_empty() {
                    body["reply_markup"] = keyboard_markup(&buttons);
                }
                self.call("editMessageText", body).await?;
                Ok(ApiResponse::Ok)
            }

            ApiEffect::DeleteMessage { chat, message } => {
                self.call("deleteMessage", json!({"chat_id": chat, "message_id": message}))
                    .await?;
                Ok(ApiResponse::Ok)
            }

            ApiEffect::AnswerCallback {
                callback,
                text,
                show_alert,
            } => {
                let mut body = json!({"callback_query_id": callback, "show_alert": show_alert});
                if let Some(text) = text {
                    body["text"] = json!(text);
                }
                self.call("answerCallbackQuery", body).await?;
                Ok(ApiResponse::Ok)
            }

            ApiEffect::RestrictMember {
                chat,
                user,
                permissions,
                until,
            } => {
                let mut body = json!({
                    "chat_id": chat,
                    "user_id": user,
                    "permissions": permissions_body(&permissions),
                });
                if let Some(until) = until {
                    body["until_date"] = json!(until.timestamp());
                }
                self.call("restrictChatMember", body).await?;
                Ok(ApiResponse::Ok)
            }

            ApiEffect::GetMemberStatus { chat, user } => {
                let result = self
                    .call("getChatMember", json!({"chat_id": chat, "user_id": user}))
                    .await?;
                let member: ChatMember = serde_json::from_value(result)
                    .map_err(|_| TelegramError::UnexpectedShape {
                        method: "getChatMember",
                    })?;
                let status = MemberStatus::parse(&member.status)
                    .ok_or(TelegramError::UnexpectedShape {
                        method: "getChatMember",
                    })?;
                Ok(ApiResponse::MemberStatus(status))
            }

            ApiEffect::GetChatAdministrators { chat } => {
                let result = self
                    .call("getChatAdministrators", json!({"chat_id": chat}))
                    .await?;
                let entries: Vec<AdminEntry> = serde_json::from_value(result)
                    .map_err(|_| TelegramError::UnexpectedShape {
                        method: "getChatAdministrators",
                    })?;
                Ok(ApiResponse::Administrators(
                    entries.into_iter().map(|e| UserId(e.user.id)).collect(),
                ))
            }

            ApiEffect::ApproveJoinRequest { chat, user } => {
                self.call(
                    "approveChatJoinRequest",
                    json!({"chat_id": chat, "user_id": user}),
                )
                .await?;
                Ok(ApiResponse::Ok)
            }

            ApiEffect::DeclineJoinRequest { chat, user } => {
                self.call(
                    "declineChatJoinRequest",
                    json!({"chat_id": chat, "user_id": user}),
                )
                .await?;
                Ok(ApiResponse::Ok)
            }
        }
    }
}

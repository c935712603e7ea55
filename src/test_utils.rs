//! Shared test utilities: the recording interpreter and update builders.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::effects::{ApiEffect, ApiInterpreter, ApiResponse};
use crate::types::{ChatId, MemberStatus, MessageId, UpdateId, UserId};
use crate::updates::{
    Actor, ButtonPayload, ButtonPress, JoinRequest, MemberStatusChange, MessageEvent, Update,
};

/// Error type for scripted interpreter failures.
#[derive(Debug)]
pub struct MockFailure(pub String);

impl fmt::Display for MockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockFailure {}

/// Records every effect and answers queries from scripted state.
///
/// Queries without a script fail, mirroring an API that refuses the call;
/// plain mutations succeed unless a failure is armed.
#[derive(Default)]
pub struct RecordingInterpreter {
    effects: Mutex<Vec<ApiEffect>>,
    member_status: Mutex<HashMap<(ChatId, UserId), MemberStatus>>,
    admins: Mutex<HashMap<ChatId, Vec<UserId>>>,
    fail_admins: AtomicBool,
    fail_deletes: AtomicBool,
    next_message_id: AtomicI64,
}

impl RecordingInterpreter {
    pub fn new() -> Self {
        RecordingInterpreter {
            next_message_id: AtomicI64::new(1000),
            ..Self::default()
        }
    }

    /// Every effect interpreted so far, in order.
    pub fn effects(&self) -> Vec<ApiEffect> {
        self.effects.lock().unwrap().clone()
    }

    /// Count of interpreted effects matching `predicate`.
    pub fn count_effects(&self, predicate: impl Fn(&ApiEffect) -> bool) -> usize {
        self.effects.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    /// Scripts the response to a member-status query.
    pub fn set_member_status(&self, chat: ChatId, user: UserId, status: MemberStatus) {
        self.member_status
            .lock()
            .unwrap()
            .insert((chat, user), status);
    }

    /// Scripts the admin list for a chat.
    pub fn set_admins(&self, chat: ChatId, admins: Vec<UserId>) {
        self.admins.lock().unwrap().insert(chat, admins);
    }

    /// Makes every admin lookup fail.
    pub fn fail_admin_lookups(&self) {
        self.fail_admins.store(true, Ordering::SeqCst);
    }

    /// Makes every message deletion fail.
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }
}

impl ApiInterpreter for RecordingInterpreter {
    type Error = MockFailure;

    async fn interpret(&self, effect: ApiEffect) -> Result<ApiResponse, MockFailure> {
        self.effects.lock().unwrap().push(effect.clone());
        match effect {
            ApiEffect::SendMessage { .. } => Ok(ApiResponse::MessageSent {
                message: MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
            }),

            ApiEffect::GetMemberStatus { chat, user } => self
                .member_status
                .lock()
                .unwrap()
                .get(&(chat, user))
                .copied()
                .map(ApiResponse::MemberStatus)
                .ok_or_else(|| MockFailure(format!("no scripted status for {user} in {chat}"))),

            ApiEffect::GetChatAdministrators { chat } => {
                if self.fail_admins.load(Ordering::SeqCst) {
                    return Err(MockFailure("admin lookup armed to fail".to_string()));
                }
                Ok(ApiResponse::Administrators(
                    self.admins
                        .lock()
                        .unwrap()
                        .get(&chat)
                        .cloned()
                        .unwrap_or_default(),
                ))
            }

            ApiEffect::DeleteMessage { .. } => {
                if self.fail_deletes.load(Ordering::SeqCst) {
                    return Err(MockFailure("delete armed to fail".to_string()));
                }
                Ok(ApiResponse::Ok)
            }

            _ => Ok(ApiResponse::Ok),
        }
    }
}

// ─── update builders ───

/// A self-initiated left→member transition.
pub fn member_join(update_id: i64, chat: ChatId, user: UserId) -> Update {
    member_transition(
        update_id,
        chat,
        user,
        Some(MemberStatus::Left),
        MemberStatus::Member,
        Some(user),
    )
}

pub fn member_transition(
    update_id: i64,
    chat: ChatId,
    user: UserId,
    old_status: Option<MemberStatus>,
    new_status: MemberStatus,
    initiator: Option<UserId>,
) -> Update {
    Update::MemberStatusChange(MemberStatusChange {
        update_id: UpdateId(update_id),
        chat,
        subject: Actor::user(user),
        old_status,
        new_status,
        initiator,
    })
}

pub fn group_message(update_id: i64, chat: ChatId, user: UserId, message_id: MessageId) -> Update {
    Update::Message(MessageEvent {
        update_id: UpdateId(update_id),
        chat,
        message_id,
        sender: Actor::user(user),
        sender_channel: None,
        is_direct: false,
        text: Some("hello".to_string()),
    })
}

pub fn direct_message(update_id: i64, user: UserId) -> Update {
    Update::Message(MessageEvent {
        update_id: UpdateId(update_id),
        chat: ChatId(user.0),
        message_id: MessageId(1),
        sender: Actor::user(user),
        sender_channel: None,
        is_direct: true,
        text: Some("ping".to_string()),
    })
}

pub fn button_press(
    update_id: i64,
    chat: ChatId,
    presser: UserId,
    message_id: MessageId,
    payload: ButtonPayload,
) -> Update {
    Update::ButtonPress(ButtonPress {
        update_id: UpdateId(update_id),
        chat,
        message_id,
        presser: Actor::user(presser),
        callback_id: crate::types::CallbackId(format!("cb-{update_id}")),
        payload,
    })
}

pub fn join_request(update_id: i64, chat: ChatId, user: UserId) -> Update {
    Update::JoinRequest(JoinRequest {
        update_id: UpdateId(update_id),
        chat,
        applicant: Actor::user(user),
    })
}

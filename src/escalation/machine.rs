//! The subscription-violation escalation machine.
//!
//! Every qualifying group message triggers a subscription check against the
//! configured target channel. Unsubscribed senders have the message deleted
//! and a violation counted; at the threshold the user climbs one level on the
//! mute ladder. Counters decay after six hours of inactivity; ladder levels
//! are durable and never auto-decremented.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{MessageTemplates, ModerationConfig};
use crate::deferred::{ActionKind, DeferredAction, DeferredQueue};
use crate::effects::{ApiEffect, ApiInterpreter, ApiResponse, Button};
use crate::store::{MuteLevelRow, RowStore, TtlCache};
use crate::types::{ChatId, MemberStatus, MessageId, PermissionSet, UserId};
use crate::updates::{ButtonPayload, ButtonPress, MessageEvent};

/// Counter decay: six hours without a violation resets to absent.
const COUNTER_TTL_SECS: i64 = 21_600;

/// Bound on waiting for the counter lock.
const LOCK_WAIT: std::time::Duration = std::time::Duration::from_secs(3);

/// What the machine did with a message, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Enforcement is off or the check could not be made.
    Skipped,
    /// The sender is subscribed.
    Subscribed,
    /// Violation counted; below the threshold.
    Counted(u32),
    /// The threshold was hit and a mute applied at this ladder level.
    Escalated(u32),
}

/// The escalation machine: decaying counters, durable levels, and the
/// warning bookkeeping needed for edit-only-if-changed rechecks.
pub struct EscalationMachine {
    levels: Box<dyn RowStore>,
    counters: Mutex<TtlCache<UserId, u32>>,

    /// Serializes the whole bump / threshold check / level write / counter
    /// clear sequence; two interleaved violations must not both observe the
    /// threshold. Bounded wait; on timeout the sequence proceeds without
    /// exclusion rather than stalling the webhook response.
    mutation_lock: tokio::sync::Mutex<()>,

    /// The outstanding warning per (chat, user): message id and its rendered
    /// text, so a recheck can edit only when the text actually changed.
    warnings: Mutex<TtlCache<(ChatId, UserId), (MessageId, String)>>,
}

impl EscalationMachine {
    pub fn new(levels: Box<dyn RowStore>) -> Self {
        EscalationMachine {
            levels,
            counters: Mutex::new(TtlCache::new(Duration::seconds(COUNTER_TTL_SECS))),
            mutation_lock: tokio::sync::Mutex::new(()),
            warnings: Mutex::new(TtlCache::new(Duration::seconds(COUNTER_TTL_SECS))),
        }
    }

    /// Current counter value, if live (diagnostics and tests).
    pub fn counter(&self, user: UserId) -> Option<u32> {
        self.counters.lock().ok()?.get(&user).copied()
    }

    fn clear_counter(&self, user: UserId) -> Option<u32> {
        self.counters.lock().ok()?.remove(&user)
    }

    fn bump_counter(&self, user: UserId) -> u32 {
        let Ok(mut counters) = self.counters.lock() else {
            return 1;
        };
        let next = counters.get(&user).copied().unwrap_or(0) + 1;
        counters.insert(user, next);
        next
    }

    /// Handles one qualifying group message.
    pub async fn handle_message<I: ApiInterpreter>(
        &self,
        event: &MessageEvent,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) -> MessageOutcome {
        let Some(target) = config.target_channel else {
            return MessageOutcome::Skipped;
        };

        let subscribed = match self.check_subscription(target, event.sender.id, interpreter).await
        {
            Some(subscribed) => subscribed,
            // Indeterminate: the check failed, the message stands.
            None => return MessageOutcome::Skipped,
        };

        if subscribed {
            // A live counter means they were mid-violation; their earlier
            // restriction (if any) is lifted now that they are back.
            if self.clear_counter(event.sender.id).is_some() {
                self.lift_restriction(event.chat, event.sender.id, interpreter).await;
            }
            return MessageOutcome::Subscribed;
        }

        // Deletion is best-effort: the violation counts either way.
        if let Err(e) = interpreter
            .interpret(ApiEffect::DeleteMessage {
                chat: event.chat,
                message: event.message_id,
            })
            .await
        {
            warn!(chat = %event.chat, message = %event.message_id, error = %e,
                "violating message deletion failed");
        }

        match tokio::time::timeout(LOCK_WAIT, self.mutation_lock.lock()).await {
            Ok(_guard) => {
                self.count_and_escalate(event, config, queue, interpreter, now)
                    .await
            }
            Err(_) => {
                warn!(user = %event.sender.id,
                    "violation lock wait timed out, proceeding without exclusion");
                self.count_and_escalate(event, config, queue, interpreter, now)
                    .await
            }
        }
    }

    /// The critical section behind `mutation_lock`: counts the violation and,
    /// at the threshold, climbs the ladder and resets the counter. Letting
    /// two of these interleave would fire the threshold twice off one run of
    /// violations.
    async fn count_and_escalate<I: ApiInterpreter>(
        &self,
        event: &MessageEvent,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) -> MessageOutcome {
        let count = self.bump_counter(event.sender.id);

        if count < config.violation_limit {
            // Warn once; later sub-threshold violations count silently.
            if count == 1 {
                self.send_warning(event, config, queue, interpreter, now).await;
            }
            debug!(user = %event.sender.id, count, "violation counted");
            return MessageOutcome::Counted(count);
        }

        let level = self.escalate(event, config, queue, interpreter, now).await;
        MessageOutcome::Escalated(level)
    }

    /// Handles a "recheck subscription" button press.
    pub async fn handle_recheck<I: ApiInterpreter>(
        &self,
        press: &ButtonPress,
        config: &ModerationConfig,
        interpreter: &I,
    ) {
        let ButtonPayload::RecheckSubscription { user } = press.payload else {
            return;
        };

        if user != press.presser.id {
            let _ = interpreter
                .interpret(ApiEffect::AnswerCallback {
                    callback: press.callback_id.clone(),
                    text: Some(config.templates.not_your_button.clone()),
                    show_alert: true,
                })
                .await;
            return;
        }

        let Some(target) = config.target_channel else {
            return;
        };
        let Some(subscribed) = self.check_subscription(target, user, interpreter).await else {
            let _ = interpreter
                .interpret(ApiEffect::AnswerCallback {
                    callback: press.callback_id.clone(),
                    text: None,
                    show_alert: false,
                })
                .await;
            return;
        };

        if subscribed {
            self.clear_counter(user);
            self.lift_restriction(press.chat, user, interpreter).await;

            let text = MessageTemplates::render(
                &config.templates.unmute_notice,
                &press.presser.mention(),
            );
            if let Err(e) = interpreter
                .interpret(ApiEffect::EditMessageText {
                    chat: press.chat,
                    message: press.message_id,
                    text,
                    buttons: Vec::new(),
                })
                .await
            {
                warn!(chat = %press.chat, message = %press.message_id, error = %e,
                    "recheck success edit failed");
            }
            if let Ok(mut warnings) = self.warnings.lock() {
                warnings.remove(&(press.chat, user));
            }
            info!(chat = %press.chat, user = %user, "recheck passed, counter cleared");
        } else {
            // Still unsubscribed. Re-render the warning and edit only if the
            // text actually changed; identical edits are API errors.
            let text = MessageTemplates::render(
                &config.templates.subscription_warning,
                &press.presser.mention(),
            );
            let unchanged = self
                .warnings
                .lock()
                .ok()
                .and_then(|w| w.get(&(press.chat, user)).map(|(_, t)| t == &text))
                .unwrap_or(false);
            if !unchanged {
                if let Err(e) = interpreter
                    .interpret(ApiEffect::EditMessageText {
                        chat: press.chat,
                        message: press.message_id,
                        text: text.clone(),
                        buttons: vec![recheck_button(config, user)],
                    })
                    .await
                {
                    warn!(chat = %press.chat, message = %press.message_id, error = %e,
                        "recheck failure edit failed");
                } else if let Ok(mut warnings) = self.warnings.lock() {
                    warnings.insert((press.chat, user), (press.message_id, text));
                }
            }
        }

        let _ = interpreter
            .interpret(ApiEffect::AnswerCallback {
                callback: press.callback_id.clone(),
                text: None,
                show_alert: false,
            })
            .await;
    }

    async fn check_subscription<I: ApiInterpreter>(
        &self,
        target: ChatId,
        user: UserId,
        interpreter: &I,
    ) -> Option<bool> {
        match interpreter
            .interpret(ApiEffect::GetMemberStatus { chat: target, user })
            .await
        {
            Ok(ApiResponse::MemberStatus(status)) => Some(status.is_subscribed()),
            Ok(other) => {
                warn!(%target, %user, ?other, "unexpected response to subscription check");
                None
            }
            Err(e) => {
                warn!(%target, %user, error = %e, "subscription check failed");
                None
            }
        }
    }

    async fn lift_restriction<I: ApiInterpreter>(
        &self,
        chat: ChatId,
        user: UserId,
        interpreter: &I,
    ) {
        if let Err(e) = interpreter
            .interpret(ApiEffect::RestrictMember {
                chat,
                user,
                permissions: PermissionSet::full(),
                until: None,
            })
            .await
        {
            warn!(%chat, %user, error = %e, "lifting restriction failed");
        }
    }

    async fn send_warning<I: ApiInterpreter>(
        &self,
        event: &MessageEvent,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) {
        let text = MessageTemplates::render(
            &config.templates.subscription_warning,
            &event.sender.mention(),
        );
        let sent = interpreter
            .interpret(ApiEffect::SendMessage {
                chat: event.chat,
                text: text.clone(),
                buttons: vec![recheck_button(config, event.sender.id)],
            })
            .await;

        let message = match sent {
            Ok(ApiResponse::MessageSent { message }) => message,
            Ok(other) => {
                warn!(chat = %event.chat, ?other, "unexpected response sending warning");
                return;
            }
            Err(e) => {
                warn!(chat = %event.chat, user = %event.sender.id, error = %e, "warning failed");
                return;
            }
        };

        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.insert((event.chat, event.sender.id), (message, text));
        }

        // Warnings are temporary.
        if let Err(e) = queue
            .append(DeferredAction::new(
                ActionKind::DeleteMessage {
                    chat: event.chat,
                    message,
                },
                now + config.warning_notice_ttl,
            ))
            .await
        {
            warn!(chat = %event.chat, message = %message, error = %e,
                "could not arm warning deletion");
        }
    }

    /// Applies the threshold mute: one step up the ladder, saturating at the
    /// last entry. Returns the new level.
    async fn escalate<I: ApiInterpreter>(
        &self,
        event: &MessageEvent,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) -> u32 {
        let user = event.sender.id;
        let current = match self.levels.get(user) {
            Ok(Some(row)) => row.level,
            Ok(None) => 0,
            Err(e) => {
                warn!(%user, error = %e, "level store read failed, assuming level 0");
                0
            }
        };
        let level = current + 1;

        let minutes = config.mute_minutes_for_level(level);
        if let Some(minutes) = minutes {
            if let Err(e) = interpreter
                .interpret(ApiEffect::RestrictMember {
                    chat: event.chat,
                    user,
                    permissions: PermissionSet::none(),
                    until: Some(now + Duration::minutes(i64::from(minutes))),
                })
                .await
            {
                warn!(chat = %event.chat, %user, error = %e, "escalation mute failed");
            }
        }

        if let Err(e) = self.levels.put(&MuteLevelRow {
            user,
            level,
            updated_at: now,
        }) {
            warn!(%user, error = %e, "level store write failed");
        }

        self.clear_counter(user);

        if let Some(minutes) = minutes {
            let text = MessageTemplates::render_with_minutes(
                &config.templates.mute_notice,
                &event.sender.mention(),
                minutes,
            );
            match interpreter
                .interpret(ApiEffect::SendMessage {
                    chat: event.chat,
                    text,
                    buttons: Vec::new(),
                })
                .await
            {
                Ok(ApiResponse::MessageSent { message }) => {
                    if let Err(e) = queue
                        .append(DeferredAction::new(
                            ActionKind::DeleteMessage {
                                chat: event.chat,
                                message,
                            },
                            now + config.mute_notice_ttl,
                        ))
                        .await
                    {
                        warn!(chat = %event.chat, %message, error = %e,
                            "could not arm mute notice deletion");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(chat = %event.chat, %user, error = %e, "mute notice failed");
                }
            }
        }

        info!(chat = %event.chat, %user, level, ?minutes, "escalation applied");
        level
    }

    /// Reclaims expired counter and warning slots. Invoked from the sweep.
    pub fn purge_expired(&self) -> usize {
        let mut purged = 0;
        if let Ok(mut counters) = self.counters.lock() {
            purged += counters.purge_expired();
        }
        if let Ok(mut warnings) = self.warnings.lock() {
            purged += warnings.purge_expired();
        }
        purged
    }
}

fn recheck_button(config: &ModerationConfig, user: UserId) -> Button {
    Button {
        text: config.templates.recheck_button.clone(),
        payload: ButtonPayload::RecheckSubscription { user }.to_string(),
    }
}

//! The moderation dispatcher.
//!
//! Top-level orchestration for one inbound update: idempotency gate, filter
//! pipeline, then routing to the challenge or escalation machine. Also owns
//! the sweep entry point the periodic driver invokes. Nothing a single update
//! does may propagate an error out of the dispatcher; the webhook endpoint
//! must always be able to acknowledge.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::challenge::ChallengeMachine;
use crate::config::ConfigCache;
use crate::deferred::{ActionKind, DeferredQueue};
use crate::effects::{ApiEffect, ApiInterpreter};
use crate::escalation::{EscalationMachine, MessageOutcome};
use crate::gate::{GateDecision, IdempotencyGate};
use crate::pipeline::{DropReason, Pipeline, Verdict};
use crate::updates::{parse_update, ButtonPayload, Update};

/// What the dispatcher did with an update, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rejected by the idempotency gate; zero side effects.
    Duplicate,
    /// Rejected by the pipeline.
    Dropped(DropReason),
    /// The operator's liveness reply.
    Diagnostic,
    /// Routed to the challenge machine.
    Challenge,
    /// Routed to the escalation machine.
    Message(MessageOutcome),
    /// A challenge or recheck button was handled.
    Button,
    /// Parse failure or an update kind nothing handles.
    Ignored,
}

/// Wires the gate, pipeline, machines, and queue together.
pub struct Dispatcher<I: ApiInterpreter> {
    interpreter: I,
    config: ConfigCache,
    gate: IdempotencyGate,
    pipeline: Pipeline,
    challenges: ChallengeMachine,
    escalation: EscalationMachine,
    queue: DeferredQueue,
}

impl<I: ApiInterpreter> Dispatcher<I> {
    pub fn new(
        interpreter: I,
        config: ConfigCache,
        gate: IdempotencyGate,
        pipeline: Pipeline,
        challenges: ChallengeMachine,
        escalation: EscalationMachine,
        queue: DeferredQueue,
    ) -> Self {
        Dispatcher {
            interpreter,
            config,
            gate,
            pipeline,
            challenges,
            escalation,
            queue,
        }
    }

    /// Parses and processes one raw webhook payload.
    ///
    /// Malformed payloads and unknown update kinds are logged and ignored;
    /// the caller acknowledges the delivery either way.
    pub async fn handle_raw(&self, payload: &[u8]) -> Outcome {
        match parse_update(payload) {
            Ok(Some(update)) => self.handle_update(&update).await,
            Ok(None) => {
                debug!("unhandled update kind");
                Outcome::Ignored
            }
            Err(e) => {
                warn!(error = %e, "malformed webhook payload dropped");
                Outcome::Ignored
            }
        }
    }

    /// Processes one normalized update.
    pub async fn handle_update(&self, update: &Update) -> Outcome {
        if self.gate.check_and_record(update.update_id()) == GateDecision::Duplicate {
            return Outcome::Duplicate;
        }

        let config = self.config.current();
        let now = Utc::now();

        match self
            .pipeline
            .evaluate(update, &config, &self.interpreter)
            .await
        {
            Verdict::Drop(reason) => return Outcome::Dropped(reason),
            Verdict::OperatorDiagnostic => {
                let text = format!(
                    "moderation is {}; webhook alive",
                    if config.enabled { "enabled" } else { "disabled" }
                );
                if let Err(e) = self
                    .interpreter
                    .interpret(ApiEffect::SendMessage {
                        chat: update.chat_id(),
                        text,
                        buttons: Vec::new(),
                    })
                    .await
                {
                    warn!(error = %e, "diagnostic reply failed");
                }
                return Outcome::Diagnostic;
            }
            Verdict::Proceed => {}
        }

        match update {
            Update::MemberStatusChange(event) => {
                self.challenges
                    .handle_member_change(event, &config, &self.queue, &self.interpreter, now)
                    .await;
                Outcome::Challenge
            }

            Update::JoinRequest(request) => {
                self.challenges
                    .handle_join_request(request, &config, &self.queue, &self.interpreter, now)
                    .await;
                Outcome::Challenge
            }

            Update::Message(event) => {
                let outcome = self
                    .escalation
                    .handle_message(event, &config, &self.queue, &self.interpreter, now)
                    .await;
                Outcome::Message(outcome)
            }

            Update::ButtonPress(press) => match &press.payload {
                ButtonPayload::ChallengePass { .. } => {
                    self.challenges
                        .handle_button(press, &config, &self.interpreter)
                        .await;
                    Outcome::Button
                }
                ButtonPayload::RecheckSubscription { .. } => {
                    self.escalation
                        .handle_recheck(press, &config, &self.interpreter)
                        .await;
                    Outcome::Button
                }
                // Stale buttons from older deployments: acknowledge so the
                // client stops spinning, change nothing.
                ButtonPayload::Unknown(raw) => {
                    debug!(payload = %raw, "unknown button payload");
                    let _ = self
                        .interpreter
                        .interpret(ApiEffect::AnswerCallback {
                            callback: press.callback_id.clone(),
                            text: None,
                            show_alert: false,
                        })
                        .await;
                    Outcome::Ignored
                }
            },
        }
    }

    /// Runs one sweep: executes due deferred actions and prunes the TTL
    /// caches. Idempotent; safe to invoke concurrently with updates.
    /// Returns the number of actions executed.
    pub async fn run_sweep(&self) -> usize {
        let now = Utc::now();
        let config = self.config.current();

        let due = match self.queue.take_due(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "sweep could not read the queue");
                Vec::new()
            }
        };

        let executed = due.len();
        for action in due {
            match action.kind {
                ActionKind::DeleteMessage { chat, message } => {
                    if let Err(e) = self
                        .interpreter
                        .interpret(ApiEffect::DeleteMessage { chat, message })
                        .await
                    {
                        warn!(%chat, %message, error = %e, "deferred deletion failed");
                    }
                }
                ActionKind::ExpireChallenge { chat, user, prompt } => {
                    self.challenges
                        .expire(chat, user, prompt, &config, &self.queue, &self.interpreter, now)
                        .await;
                }
            }
        }

        let purged = self.gate.purge_expired()
            + self.pipeline.purge_expired()
            + self.challenges.purge_expired()
            + self.escalation.purge_expired();
        if executed > 0 || purged > 0 {
            info!(executed, purged, "sweep complete");
        }
        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModerationConfig, StaticConfigSource};
    use crate::deferred::DeferredAction;
    use crate::store::{MemoryQueueStore, MemoryRowStore};
    use crate::test_utils::{
        button_press, group_message, join_request, member_join, RecordingInterpreter,
    };
    use crate::types::{ChatId, MemberStatus, MessageId, UserId};
    use chrono::Duration;

    const CHAT: ChatId = ChatId(-100);
    const CHANNEL: ChatId = ChatId(-500);
    const BOT: UserId = UserId(999);
    const USER: UserId = UserId(7);

    fn dispatcher(config: ModerationConfig) -> Dispatcher<RecordingInterpreter> {
        Dispatcher::new(
            RecordingInterpreter::new(),
            ConfigCache::with_default_ttl(Box::new(StaticConfigSource::new(config))),
            IdempotencyGate::with_default_window(),
            Pipeline::new(BOT),
            ChallengeMachine::new(),
            EscalationMachine::new(Box::new(MemoryRowStore::new())),
            DeferredQueue::new(Box::new(MemoryQueueStore::new())),
        )
    }

    fn base_config() -> ModerationConfig {
        let mut config = ModerationConfig {
            target_channel: Some(CHANNEL),
            ..ModerationConfig::default()
        };
        config.authorized_chats.insert(CHAT);
        config
    }

    #[tokio::test]
    async fn duplicate_update_has_zero_side_effects() {
        let d = dispatcher(base_config());
        d.interpreter.set_member_status(CHANNEL, USER, MemberStatus::Left);

        let update = group_message(1, CHAT, USER, MessageId(10));
        assert!(matches!(d.handle_update(&update).await, Outcome::Message(_)));
        let effects_after_first = d.interpreter.effects().len();

        // Redelivery of the same update id.
        assert_eq!(d.handle_update(&update).await, Outcome::Duplicate);
        assert_eq!(d.interpreter.effects().len(), effects_after_first);
        assert_eq!(d.escalation.counter(USER), Some(1));
    }

    #[tokio::test]
    async fn join_flows_through_to_challenge() {
        let d = dispatcher(base_config());
        let outcome = d.handle_update(&member_join(1, CHAT, USER)).await;
        assert_eq!(outcome, Outcome::Challenge);
        assert!(d
            .interpreter
            .effects()
            .iter()
            .any(|e| matches!(e, ApiEffect::RestrictMember { .. })));
    }

    #[tokio::test]
    async fn join_request_is_approved_then_challenged() {
        let d = dispatcher(base_config());
        let outcome = d.handle_update(&join_request(1, CHAT, USER)).await;
        assert_eq!(outcome, Outcome::Challenge);

        let effects = d.interpreter.effects();
        assert!(matches!(effects[0], ApiEffect::ApproveJoinRequest { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, ApiEffect::RestrictMember { .. })));
    }

    #[tokio::test]
    async fn unknown_button_is_acked_only() {
        let d = dispatcher(base_config());
        let press = button_press(
            1,
            CHAT,
            USER,
            MessageId(5),
            crate::updates::ButtonPayload::Unknown("legacy:1".to_string()),
        );
        assert_eq!(d.handle_update(&press).await, Outcome::Ignored);
        let effects = d.interpreter.effects();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], ApiEffect::AnswerCallback { .. }));
    }

    #[tokio::test]
    async fn malformed_payload_is_ignored() {
        let d = dispatcher(base_config());
        assert_eq!(d.handle_raw(b"{not json").await, Outcome::Ignored);
        assert!(d.interpreter.effects().is_empty());
    }

    #[tokio::test]
    async fn sweep_executes_each_due_action_once() {
        let d = dispatcher(base_config());
        let now = Utc::now();
        for i in 0..4i64 {
            d.queue
                .append(DeferredAction::new(
                    ActionKind::DeleteMessage {
                        chat: CHAT,
                        message: MessageId(i),
                    },
                    now - Duration::seconds(1),
                ))
                .await
                .unwrap();
        }

        assert_eq!(d.run_sweep().await, 4);
        assert_eq!(
            d.interpreter
                .count_effects(|e| matches!(e, ApiEffect::DeleteMessage { .. })),
            4
        );

        // Nothing left for the next tick.
        assert_eq!(d.run_sweep().await, 0);
        assert_eq!(
            d.interpreter
                .count_effects(|e| matches!(e, ApiEffect::DeleteMessage { .. })),
            4
        );
    }

    #[tokio::test]
    async fn disabled_config_drops_via_pipeline() {
        let mut config = base_config();
        config.enabled = false;
        let d = dispatcher(config);
        let outcome = d.handle_update(&group_message(1, CHAT, USER, MessageId(10))).await;
        assert_eq!(outcome, Outcome::Dropped(DropReason::Disabled));
        assert!(d.interpreter.effects().is_empty());
    }

    #[tokio::test]
    async fn operator_diagnostic_replies() {
        let mut config = base_config();
        config.enabled = false;
        config.operator = Some(UserId(1));
        let d = dispatcher(config);

        let outcome = d
            .handle_update(&crate::test_utils::direct_message(1, UserId(1)))
            .await;
        assert_eq!(outcome, Outcome::Diagnostic);
        assert!(matches!(
            d.interpreter.effects()[0],
            ApiEffect::SendMessage { .. }
        ));
    }
}

//! The join/challenge state machine.
//!
//! New arrivals are muted and shown a single-button prompt. Pressing their
//! own button lifts the mute; the deferred queue fires a timeout if they
//! never do. The machine owns the per-(chat, user) challenge records; all
//! API calls are best-effort and logged on failure.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{MessageTemplates, ModerationConfig};
use crate::deferred::{ActionKind, DeferredAction, DeferredQueue};
use crate::effects::{ApiEffect, ApiInterpreter, ApiResponse, Button};
use crate::store::TtlCache;
use crate::types::{ChatId, MemberStatus, MessageId, PermissionSet, UserId};
use crate::updates::{Actor, ButtonPayload, ButtonPress, JoinRequest, MemberStatusChange};

use super::record::{ChallengeRecord, ChallengeStatus};

/// How long finished records linger for late presses and timeouts (1 hour).
const RECORD_TTL_SECS: i64 = 3600;

/// Whether a member-status transition is a brand-new arrival.
///
/// Real joins are: new status `member`, old status absent (`left`, `kicked`,
/// or no prior record), and the change self-initiated (an absent initiator is
/// treated as self-initiated). `restricted → member` is an unmute, not a
/// join, so someone who already passed is never re-challenged.
pub fn is_real_join(event: &MemberStatusChange) -> bool {
    event.new_status == MemberStatus::Member
        && event.old_status.is_none_or(|old| old.is_absent())
        && event
            .initiator
            .is_none_or(|initiator| initiator == event.subject.id)
}

/// The challenge machine and its record cache.
pub struct ChallengeMachine {
    records: Mutex<TtlCache<(ChatId, UserId), ChallengeRecord>>,
}

impl ChallengeMachine {
    pub fn new() -> Self {
        ChallengeMachine {
            records: Mutex::new(TtlCache::new(Duration::seconds(RECORD_TTL_SECS))),
        }
    }

    /// Current record status for a pair, if a record is live.
    pub fn status(&self, chat: ChatId, user: UserId) -> Option<ChallengeStatus> {
        let records = self.records.lock().ok()?;
        records.get(&(chat, user)).map(|r| r.status)
    }

    fn record(&self, chat: ChatId, user: UserId) -> Option<ChallengeRecord> {
        let records = self.records.lock().ok()?;
        records.get(&(chat, user)).cloned()
    }

    fn put_record(&self, record: ChallengeRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert((record.chat, record.user), record);
        }
    }

    /// Handles a member-status change: starts a challenge on a real join,
    /// fails a pending challenge whose subject left, ignores everything else.
    pub async fn handle_member_change<I: ApiInterpreter>(
        &self,
        event: &MemberStatusChange,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) {
        // Leaving mid-challenge abandons it.
        if event.new_status.is_absent()
            && let Some(record) = self.record(event.chat, event.subject.id)
            && record.status == ChallengeStatus::Pending
        {
            self.fail_challenge(record, interpreter).await;
            return;
        }

        if !is_real_join(event) {
            debug!(
                chat = %event.chat,
                user = %event.subject.id,
                old = ?event.old_status,
                new = %event.new_status,
                "not a real join"
            );
            return;
        }
        self.start_challenge(event.chat, &event.subject, config, queue, interpreter, now)
            .await;
    }

    /// Handles a join request: approve, then challenge like any other join.
    pub async fn handle_join_request<I: ApiInterpreter>(
        &self,
        request: &JoinRequest,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = interpreter
            .interpret(ApiEffect::ApproveJoinRequest {
                chat: request.chat,
                user: request.applicant.id,
            })
            .await
        {
            warn!(chat = %request.chat, user = %request.applicant.id, error = %e,
                "join request approval failed");
            return;
        }
        self.start_challenge(
            request.chat,
            &request.applicant,
            config,
            queue,
            interpreter,
            now,
        )
        .await;
    }

    async fn start_challenge<I: ApiInterpreter>(
        &self,
        chat: ChatId,
        subject: &Actor,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) {
        // Channels acting as users carry synthetic ids; never challenge them.
        if subject.id.is_synthetic() {
            debug!(chat = %chat, user = %subject.id, "synthetic id, skipping challenge");
            return;
        }

        // At most one non-terminal record per (chat, user).
        if self.status(chat, subject.id) == Some(ChallengeStatus::Pending) {
            debug!(chat = %chat, user = %subject.id, "challenge already pending");
            return;
        }

        if let Err(e) = interpreter
            .interpret(ApiEffect::RestrictMember {
                chat,
                user: subject.id,
                permissions: PermissionSet::none(),
                until: Some(now + config.challenge_mute),
            })
            .await
        {
            warn!(chat = %chat, user = %subject.id, error = %e, "challenge restriction failed");
        }

        let text =
            MessageTemplates::render(&config.templates.challenge_prompt, &subject.mention());
        let prompt = match interpreter
            .interpret(ApiEffect::SendMessage {
                chat,
                text,
                buttons: vec![Button {
                    text: config.templates.challenge_button.clone(),
                    payload: ButtonPayload::ChallengePass { user: subject.id }.to_string(),
                }],
            })
            .await
        {
            Ok(ApiResponse::MessageSent { message }) => message,
            Ok(other) => {
                warn!(chat = %chat, ?other, "unexpected response sending challenge prompt");
                return;
            }
            // Without a prompt there is no button to track.
            Err(e) => {
                warn!(chat = %chat, user = %subject.id, error = %e, "challenge prompt failed");
                return;
            }
        };

        self.put_record(ChallengeRecord::pending(chat, subject.id, prompt, now));

        if let Err(e) = queue
            .append(DeferredAction::new(
                ActionKind::ExpireChallenge {
                    chat,
                    user: subject.id,
                    prompt,
                },
                now + config.challenge_timeout,
            ))
            .await
        {
            warn!(chat = %chat, user = %subject.id, error = %e, "could not arm challenge timeout");
        }

        info!(chat = %chat, user = %subject.id, prompt = %prompt, "challenge issued");
    }

    /// Handles a challenge button press.
    ///
    /// Returns true when the press passed a pending challenge.
    pub async fn handle_button<I: ApiInterpreter>(
        &self,
        press: &ButtonPress,
        config: &ModerationConfig,
        interpreter: &I,
    ) -> bool {
        let ButtonPayload::ChallengePass { user } = press.payload else {
            return false;
        };

        // The button belongs to exactly one user.
        if user != press.presser.id {
            debug!(
                chat = %press.chat,
                presser = %press.presser.id,
                owner = %user,
                "challenge button pressed by someone else"
            );
            let _ = interpreter
                .interpret(ApiEffect::AnswerCallback {
                    callback: press.callback_id.clone(),
                    text: Some(config.templates.not_your_button.clone()),
                    show_alert: true,
                })
                .await;
            return false;
        }

        let Some(record) = self.record(press.chat, user) else {
            debug!(chat = %press.chat, user = %user, "press without a challenge record");
            self.ack(press, interpreter).await;
            return false;
        };
        if record.status != ChallengeStatus::Pending {
            debug!(chat = %press.chat, user = %user, status = ?record.status, "stale press");
            self.ack(press, interpreter).await;
            return false;
        }

        if let Err(e) = interpreter
            .interpret(ApiEffect::RestrictMember {
                chat: press.chat,
                user,
                permissions: PermissionSet::full(),
                until: None,
            })
            .await
        {
            warn!(chat = %press.chat, user = %user, error = %e, "lifting challenge mute failed");
        }

        if let Err(e) = interpreter
            .interpret(ApiEffect::DeleteMessage {
                chat: press.chat,
                message: record.prompt,
            })
            .await
        {
            warn!(chat = %press.chat, message = %record.prompt, error = %e,
                "deleting challenge prompt failed");
        }

        self.put_record(ChallengeRecord {
            status: ChallengeStatus::Passed,
            ..record
        });
        self.ack(press, interpreter).await;

        info!(chat = %press.chat, user = %user, "challenge passed");
        true
    }

    /// Marks a pending challenge failed and removes its prompt. The armed
    /// timeout becomes a no-op once the record leaves `pending`.
    async fn fail_challenge<I: ApiInterpreter>(&self, record: ChallengeRecord, interpreter: &I) {
        if let Err(e) = interpreter
            .interpret(ApiEffect::DeleteMessage {
                chat: record.chat,
                message: record.prompt,
            })
            .await
        {
            warn!(chat = %record.chat, message = %record.prompt, error = %e,
                "deleting abandoned challenge prompt failed");
        }

        info!(chat = %record.chat, user = %record.user, "challenge abandoned");
        self.put_record(ChallengeRecord {
            status: ChallengeStatus::Failed,
            ..record
        });
    }

    async fn ack<I: ApiInterpreter>(&self, press: &ButtonPress, interpreter: &I) {
        let _ = interpreter
            .interpret(ApiEffect::AnswerCallback {
                callback: press.callback_id.clone(),
                text: None,
                show_alert: false,
            })
            .await;
    }

    /// Fires the challenge timeout. Invoked by the sweep when an
    /// expire-challenge action comes due.
    ///
    /// A record that already left `pending` makes this a no-op; the user
    /// passed between arming and firing.
    pub async fn expire<I: ApiInterpreter>(
        &self,
        chat: ChatId,
        user: UserId,
        prompt: MessageId,
        config: &ModerationConfig,
        queue: &DeferredQueue,
        interpreter: &I,
        now: DateTime<Utc>,
    ) {
        match self.record(chat, user) {
            Some(record) if record.status == ChallengeStatus::Pending => {}
            other => {
                debug!(chat = %chat, user = %user, status = ?other.map(|r| r.status),
                    "challenge timeout is a no-op");
                return;
            }
        }

        let text = MessageTemplates::render(
            &config.templates.challenge_timeout,
            &format!("user {user}"),
        );
        if let Err(e) = interpreter
            .interpret(ApiEffect::EditMessageText {
                chat,
                message: prompt,
                text,
                buttons: Vec::new(),
            })
            .await
        {
            warn!(chat = %chat, message = %prompt, error = %e, "timeout notice edit failed");
        }

        // The notice itself is temporary.
        if let Err(e) = queue
            .append(DeferredAction::new(
                ActionKind::DeleteMessage {
                    chat,
                    message: prompt,
                },
                now + config.warning_notice_ttl,
            ))
            .await
        {
            warn!(chat = %chat, message = %prompt, error = %e, "could not arm notice deletion");
        }

        if let Some(record) = self.record(chat, user) {
            self.put_record(ChallengeRecord {
                status: ChallengeStatus::Expired,
                ..record
            });
        }
        info!(chat = %chat, user = %user, "challenge expired");
    }

    /// Reclaims expired record slots. Invoked from the periodic sweep.
    pub fn purge_expired(&self) -> usize {
        match self.records.lock() {
            Ok(mut records) => records.purge_expired(),
            Err(_) => 0,
        }
    }
}

impl Default for ChallengeMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQueueStore;
    use crate::test_utils::{button_press, member_transition, RecordingInterpreter};
    use crate::types::MemberStatus;
    use crate::updates::Update;

    const CHAT: ChatId = ChatId(-100);
    const USER: UserId = UserId(7);

    fn queue() -> DeferredQueue {
        DeferredQueue::new(Box::new(MemoryQueueStore::new()))
    }

    fn join_event(old: Option<MemberStatus>, initiator: Option<UserId>) -> MemberStatusChange {
        match member_transition(1, CHAT, USER, old, MemberStatus::Member, initiator) {
            Update::MemberStatusChange(e) => e,
            _ => unreachable!(),
        }
    }

    #[test]
    fn real_join_detection() {
        assert!(is_real_join(&join_event(Some(MemberStatus::Left), Some(USER))));
        assert!(is_real_join(&join_event(Some(MemberStatus::Kicked), Some(USER))));
        assert!(is_real_join(&join_event(None, None)));

        // An unmute is not a join.
        assert!(!is_real_join(&join_event(
            Some(MemberStatus::Restricted),
            Some(USER)
        )));
        // An admin adding the user is not self-initiated.
        assert!(!is_real_join(&join_event(
            Some(MemberStatus::Left),
            Some(UserId(1))
        )));
    }

    #[tokio::test]
    async fn real_join_restricts_prompts_and_arms_timeout() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let queue = queue();
        let config = ModerationConfig::default();
        let now = Utc::now();

        machine
            .handle_member_change(
                &join_event(Some(MemberStatus::Left), Some(USER)),
                &config,
                &queue,
                &interp,
                now,
            )
            .await;

        let effects = interp.effects();
        assert!(matches!(
            effects[0],
            ApiEffect::RestrictMember { user: USER, until: Some(until), .. }
                if until == now + config.challenge_mute
        ));
        assert!(matches!(effects[1], ApiEffect::SendMessage { .. }));
        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Pending));

        let due = queue.take_due(now + config.challenge_timeout).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(matches!(
            due[0].kind,
            ActionKind::ExpireChallenge { user: USER, .. }
        ));
    }

    #[tokio::test]
    async fn restricted_to_member_never_challenges() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let config = ModerationConfig::default();

        machine
            .handle_member_change(
                &join_event(Some(MemberStatus::Restricted), Some(USER)),
                &config,
                &queue(),
                &interp,
                Utc::now(),
            )
            .await;

        assert!(interp.effects().is_empty());
        assert_eq!(machine.status(CHAT, USER), None);
    }

    #[tokio::test]
    async fn synthetic_ids_are_skipped() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let event = match member_transition(
            1,
            CHAT,
            UserId(-500),
            Some(MemberStatus::Left),
            MemberStatus::Member,
            None,
        ) {
            Update::MemberStatusChange(e) => e,
            _ => unreachable!(),
        };

        machine
            .handle_member_change(
                &event,
                &ModerationConfig::default(),
                &queue(),
                &interp,
                Utc::now(),
            )
            .await;
        assert!(interp.effects().is_empty());
    }

    #[tokio::test]
    async fn second_join_while_pending_is_ignored() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let queue = queue();
        let config = ModerationConfig::default();
        let event = join_event(Some(MemberStatus::Left), Some(USER));

        machine
            .handle_member_change(&event, &config, &queue, &interp, Utc::now())
            .await;
        let effects_after_first = interp.effects().len();
        machine
            .handle_member_change(&event, &config, &queue, &interp, Utc::now())
            .await;

        assert_eq!(interp.effects().len(), effects_after_first);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn own_button_press_passes_and_unmutes() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let queue = queue();
        let config = ModerationConfig::default();

        machine
            .handle_member_change(
                &join_event(Some(MemberStatus::Left), Some(USER)),
                &config,
                &queue,
                &interp,
                Utc::now(),
            )
            .await;

        let press = match button_press(
            2,
            CHAT,
            USER,
            MessageId(1000),
            ButtonPayload::ChallengePass { user: USER },
        ) {
            Update::ButtonPress(p) => p,
            _ => unreachable!(),
        };
        assert!(machine.handle_button(&press, &config, &interp).await);
        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Passed));

        // Restriction lifted in full, prompt deleted.
        assert!(interp.effects().iter().any(|e| matches!(
            e,
            ApiEffect::RestrictMember { user: USER, until: None, permissions, .. }
                if *permissions == PermissionSet::full()
        )));
        assert!(interp
            .effects()
            .iter()
            .any(|e| matches!(e, ApiEffect::DeleteMessage { .. })));
    }

    #[tokio::test]
    async fn mismatched_press_changes_nothing() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let queue = queue();
        let config = ModerationConfig::default();

        machine
            .handle_member_change(
                &join_event(Some(MemberStatus::Left), Some(USER)),
                &config,
                &queue,
                &interp,
                Utc::now(),
            )
            .await;
        let effects_before = interp.effects().len();

        let press = match button_press(
            2,
            CHAT,
            UserId(99),
            MessageId(1000),
            ButtonPayload::ChallengePass { user: USER },
        ) {
            Update::ButtonPress(p) => p,
            _ => unreachable!(),
        };
        assert!(!machine.handle_button(&press, &config, &interp).await);

        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Pending));
        let effects = interp.effects();
        assert_eq!(effects.len(), effects_before + 1);
        assert!(matches!(
            effects.last(),
            Some(ApiEffect::AnswerCallback { show_alert: true, text: Some(_), .. })
        ));
    }

    #[tokio::test]
    async fn timeout_on_pending_record_edits_and_rearms() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let queue = queue();
        let config = ModerationConfig::default();
        let now = Utc::now();

        machine
            .handle_member_change(
                &join_event(Some(MemberStatus::Left), Some(USER)),
                &config,
                &queue,
                &interp,
                now,
            )
            .await;

        let fire_at = now + config.challenge_timeout;
        for action in queue.take_due(fire_at).await.unwrap() {
            if let ActionKind::ExpireChallenge { chat, user, prompt } = action.kind {
                machine
                    .expire(chat, user, prompt, &config, &queue, &interp, fire_at)
                    .await;
            }
        }

        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Expired));
        assert!(interp
            .effects()
            .iter()
            .any(|e| matches!(e, ApiEffect::EditMessageText { .. })));
        // The timeout notice deletion is armed.
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn leaving_mid_challenge_fails_it() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let queue = queue();
        let config = ModerationConfig::default();
        let now = Utc::now();

        machine
            .handle_member_change(
                &join_event(Some(MemberStatus::Left), Some(USER)),
                &config,
                &queue,
                &interp,
                now,
            )
            .await;
        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Pending));

        let leave = match member_transition(
            2,
            CHAT,
            USER,
            Some(MemberStatus::Restricted),
            MemberStatus::Left,
            Some(USER),
        ) {
            Update::MemberStatusChange(e) => e,
            _ => unreachable!(),
        };
        machine
            .handle_member_change(&leave, &config, &queue, &interp, now)
            .await;

        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Failed));
        assert!(interp
            .effects()
            .iter()
            .any(|e| matches!(e, ApiEffect::DeleteMessage { .. })));

        // The armed timeout finds a terminal record and does nothing.
        let effects_after_leave = interp.effects().len();
        let fire_at = now + config.challenge_timeout;
        for action in queue.take_due(fire_at).await.unwrap() {
            if let ActionKind::ExpireChallenge { chat, user, prompt } = action.kind {
                machine
                    .expire(chat, user, prompt, &config, &queue, &interp, fire_at)
                    .await;
            }
        }
        assert_eq!(interp.effects().len(), effects_after_leave);
        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Failed));
    }

    #[tokio::test]
    async fn timeout_after_pass_is_a_noop() {
        let interp = RecordingInterpreter::new();
        let machine = ChallengeMachine::new();
        let queue = queue();
        let config = ModerationConfig::default();
        let now = Utc::now();

        machine
            .handle_member_change(
                &join_event(Some(MemberStatus::Left), Some(USER)),
                &config,
                &queue,
                &interp,
                now,
            )
            .await;
        let press = match button_press(
            2,
            CHAT,
            USER,
            MessageId(1000),
            ButtonPayload::ChallengePass { user: USER },
        ) {
            Update::ButtonPress(p) => p,
            _ => unreachable!(),
        };
        machine.handle_button(&press, &config, &interp).await;
        let effects_after_pass = interp.effects().len();

        let fire_at = now + config.challenge_timeout;
        for action in queue.take_due(fire_at).await.unwrap() {
            if let ActionKind::ExpireChallenge { chat, user, prompt } = action.kind {
                machine
                    .expire(chat, user, prompt, &config, &queue, &interp, fire_at)
                    .await;
            }
        }

        // No edit, no new deferred deletion, status still passed.
        assert_eq!(interp.effects().len(), effects_after_pass);
        assert_eq!(machine.status(CHAT, USER), Some(ChallengeStatus::Passed));
        assert!(queue.is_empty().await);
    }
}

//! The ordered filter pipeline.
//!
//! Eight short-circuiting policy checks decide whether an update is processed
//! at all. Order is load-bearing: the admin check runs last because it is the
//! only one that can call the external API, and it must not run for updates a
//! cheap check already rejected. Every drop is logged with its reason.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Duration;
use tracing::{debug, warn};

use crate::config::ModerationConfig;
use crate::effects::{ApiEffect, ApiInterpreter, ApiResponse};
use crate::store::TtlCache;
use crate::types::{ChatId, UserId};
use crate::updates::Update;

/// The platform's service notification pseudo-account.
pub const SERVICE_ACCOUNT: UserId = UserId(777_000);

/// The pseudo-account behind anonymous admin posts.
pub const ANONYMOUS_ADMIN: UserId = UserId(1_087_968_824);

/// How long a fetched admin list stays fresh (1 hour). Admin membership
/// changes rarely.
const ADMIN_CACHE_TTL_SECS: i64 = 3600;

/// Why the pipeline rejected an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The master switch is off.
    Disabled,
    /// The chat is not in the authorized set.
    UnauthorizedChat,
    /// A channel post from the monitored or a whitelisted channel.
    WhitelistedChannelPost,
    /// The processor's own account.
    SelfAccount,
    /// Some other bot account.
    BotAccount,
    /// A fixed platform pseudo-account.
    SystemAccount,
    /// The acting user is whitelisted.
    WhitelistedUser,
    /// A 1:1 message to the bot.
    DirectMessage,
    /// The acting user administers the chat.
    ChatAdmin,
}

impl DropReason {
    /// Stable tag for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Disabled => "disabled",
            DropReason::UnauthorizedChat => "unauthorized_chat",
            DropReason::WhitelistedChannelPost => "whitelisted_channel_post",
            DropReason::SelfAccount => "self_account",
            DropReason::BotAccount => "bot_account",
            DropReason::SystemAccount => "system_account",
            DropReason::WhitelistedUser => "whitelisted_user",
            DropReason::DirectMessage => "direct_message",
            DropReason::ChatAdmin => "chat_admin",
        }
    }
}

/// The pipeline's decision for one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// All checks passed; route to a state machine.
    Proceed,
    /// Rejected; the reason has been logged.
    Drop(DropReason),
    /// A direct message from the operator. The dispatcher answers with a
    /// liveness diagnostic instead of moderating.
    OperatorDiagnostic,
}

/// The eight-step filter pipeline plus its admin-list cache.
pub struct Pipeline {
    /// The bot's own account id, recognized in step 4 so it is never treated
    /// as a foreign bot.
    bot_user: UserId,
    admins: Mutex<TtlCache<ChatId, HashSet<UserId>>>,
}

impl Pipeline {
    pub fn new(bot_user: UserId) -> Self {
        Pipeline {
            bot_user,
            admins: Mutex::new(TtlCache::new(Duration::seconds(ADMIN_CACHE_TTL_SECS))),
        }
    }

    /// Runs the update through all eight checks in order.
    pub async fn evaluate<I: ApiInterpreter>(
        &self,
        update: &Update,
        config: &ModerationConfig,
        interpreter: &I,
    ) -> Verdict {
        let verdict = self.evaluate_inner(update, config, interpreter).await;
        if let Verdict::Drop(reason) = verdict {
            debug!(
                kind = update.kind(),
                chat = %update.chat_id(),
                user = %update.actor().id,
                reason = reason.as_str(),
                "update dropped"
            );
        }
        verdict
    }

    async fn evaluate_inner<I: ApiInterpreter>(
        &self,
        update: &Update,
        config: &ModerationConfig,
        interpreter: &I,
    ) -> Verdict {
        let actor = update.actor();
        let operator_dm = matches!(
            update,
            Update::Message(m) if m.is_direct && config.operator == Some(m.sender.id)
        );

        // 1. Master switch, with a narrow diagnostic allowance so the
        //    operator can prove the webhook is alive.
        if !config.enabled {
            if operator_dm {
                return Verdict::OperatorDiagnostic;
            }
            return Verdict::Drop(DropReason::Disabled);
        }

        // 2. Chat authorization. Direct messages are not group moderation and
        //    are judged by step 7 instead.
        let is_direct = matches!(update, Update::Message(m) if m.is_direct);
        if !is_direct && !config.authorized_chats.contains(&update.chat_id()) {
            return Verdict::Drop(DropReason::UnauthorizedChat);
        }

        // 3. Channel posts from the monitored channel or a whitelisted
        //    channel are left alone.
        if let Update::Message(m) = update
            && let Some(channel) = m.sender_channel
            && (config.target_channel == Some(channel)
                || config.whitelist_channels.contains(&channel))
        {
            return Verdict::Drop(DropReason::WhitelistedChannelPost);
        }

        // 4. Bot accounts, our own first.
        if actor.is_bot {
            if actor.id == self.bot_user {
                return Verdict::Drop(DropReason::SelfAccount);
            }
            return Verdict::Drop(DropReason::BotAccount);
        }

        // 5. Platform pseudo-accounts.
        if actor.id == SERVICE_ACCOUNT || actor.id == ANONYMOUS_ADMIN {
            return Verdict::Drop(DropReason::SystemAccount);
        }

        // 6. Whitelisted users.
        if config.whitelist_users.contains(&actor.id) {
            return Verdict::Drop(DropReason::WhitelistedUser);
        }

        // 7. Direct messages. The operator still gets the liveness reply.
        if is_direct {
            if operator_dm {
                return Verdict::OperatorDiagnostic;
            }
            return Verdict::Drop(DropReason::DirectMessage);
        }

        // 8. Admin check, cached, the only step that may call the API.
        if self
            .is_admin(update.chat_id(), actor.id, interpreter)
            .await
        {
            return Verdict::Drop(DropReason::ChatAdmin);
        }

        Verdict::Proceed
    }

    async fn is_admin<I: ApiInterpreter>(
        &self,
        chat: ChatId,
        user: UserId,
        interpreter: &I,
    ) -> bool {
        if let Ok(cache) = self.admins.lock()
            && let Some(admins) = cache.get(&chat)
        {
            return admins.contains(&user);
        }

        let fetched = match interpreter
            .interpret(ApiEffect::GetChatAdministrators { chat })
            .await
        {
            Ok(ApiResponse::Administrators(ids)) => ids.into_iter().collect::<HashSet<_>>(),
            Ok(other) => {
                warn!(%chat, ?other, "unexpected response to admin lookup");
                return false;
            }
            // Lookup failure must not moderate a possible admin's chat into
            // silence forever; treat as non-admin and retry on the next miss.
            Err(e) => {
                warn!(%chat, error = %e, "admin lookup failed");
                return false;
            }
        };

        let is_admin = fetched.contains(&user);
        if let Ok(mut cache) = self.admins.lock() {
            cache.insert(chat, fetched);
        }
        is_admin
    }

    /// Reclaims expired admin-list slots. Invoked from the periodic sweep.
    pub fn purge_expired(&self) -> usize {
        match self.admins.lock() {
            Ok(mut cache) => cache.purge_expired(),
            Err(_) => 0,
        }
    }
}

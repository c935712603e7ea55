//! Moderation configuration and its refresh cache.
//!
//! Two layers live here:
//!
//! - [`RuntimeSettings`]: process-level settings (bot token, listen address,
//!   data directory) read once from the environment at startup.
//! - [`ModerationConfig`]: the behavioral knobs (target channel, whitelists,
//!   escalation ladder). This is re-read through [`ConfigCache`], which holds
//!   a snapshot for a TTL and falls back to the last good snapshot, then to
//!   built-in defaults, when the source is unavailable. Configuration trouble
//!   must never take moderation offline.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::store::fsync::write_atomic;
use crate::types::{ChatId, UserId};

/// How long a fetched config snapshot stays fresh (5 minutes).
pub const DEFAULT_CONFIG_TTL_SECS: i64 = 300;

/// Default violation count that triggers a mute.
const DEFAULT_VIOLATION_LIMIT: u32 = 3;

/// Default mute applied while a join challenge is pending (30 minutes).
const DEFAULT_CHALLENGE_MUTE_SECS: i64 = 1800;

/// Default time a joiner has to press the challenge button (60 seconds).
const DEFAULT_CHALLENGE_TIMEOUT_SECS: i64 = 60;

/// Default escalation ladder, in minutes per level.
const DEFAULT_MUTE_LADDER_MINS: [u32; 3] = [60, 1440, 10_080];

/// How long a first-violation warning stays in the chat (10 minutes).
const DEFAULT_WARNING_NOTICE_SECS: i64 = 600;

/// How long a mute announcement stays in the chat (10 seconds).
const DEFAULT_MUTE_NOTICE_SECS: i64 = 10;

// ─── message templates ───

/// User-visible message texts. `{user}` is replaced with a mention of the
/// affected user; `{minutes}` with a mute duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplates {
    pub challenge_prompt: String,
    pub challenge_button: String,
    pub challenge_timeout: String,
    pub not_your_button: String,
    pub subscription_warning: String,
    pub recheck_button: String,
    pub mute_notice: String,
    pub unmute_notice: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        MessageTemplates {
            challenge_prompt: "{user}, press the button below to confirm you are human."
                .to_string(),
            challenge_button: "I am human".to_string(),
            challenge_timeout: "{user} did not confirm in time and stays muted.".to_string(),
            not_your_button: "This button is not for you.".to_string(),
            subscription_warning:
                "{user}, subscribe to the channel to post here. This message was removed."
                    .to_string(),
            recheck_button: "I subscribed".to_string(),
            mute_notice: "{user} has been muted for {minutes} minutes.".to_string(),
            unmute_notice: "{user} is subscribed again and may post.".to_string(),
        }
    }
}

impl MessageTemplates {
    /// Renders a template, substituting the user mention.
    pub fn render(template: &str, mention: &str) -> String {
        template.replace("{user}", mention)
    }

    /// Renders a template with a user mention and a duration in minutes.
    pub fn render_with_minutes(template: &str, mention: &str, minutes: u32) -> String {
        template
            .replace("{user}", mention)
            .replace("{minutes}", &minutes.to_string())
    }
}

// ─── moderation config ───

/// Durations are stored as whole seconds in the config file.
mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        i64::deserialize(d).map(Duration::seconds)
    }
}

/// The behavioral configuration the dispatcher consults on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Master switch. When off, every update is dropped (except operator
    /// direct messages, which still get a diagnostic reply).
    pub enabled: bool,

    /// The channel users must be subscribed to before posting.
    /// `None` disables subscription enforcement entirely.
    pub target_channel: Option<ChatId>,

    /// Group chats the processor is willing to moderate. Updates from any
    /// other chat are dropped.
    pub authorized_chats: HashSet<ChatId>,

    /// The human operator. Direct messages from this account bypass the
    /// kill switch for diagnostics.
    pub operator: Option<UserId>,

    /// Users exempt from all moderation.
    pub whitelist_users: HashSet<UserId>,

    /// Channels allowed to post into the group (channel posts carry a
    /// synthetic negative sender id; these are matched by channel id).
    pub whitelist_channels: HashSet<ChatId>,

    /// Violations within the counter window that trigger a mute.
    pub violation_limit: u32,

    /// Mute applied to a joiner until they pass the challenge.
    #[serde(with = "duration_secs")]
    pub challenge_mute: Duration,

    /// Time a joiner has to press the challenge button.
    #[serde(with = "duration_secs")]
    pub challenge_timeout: Duration,

    /// Mute durations per escalation level, in minutes. A user past the end
    /// of the ladder gets the last entry.
    pub mute_ladder_mins: Vec<u32>,

    /// How long first-violation warnings stay before deletion.
    #[serde(with = "duration_secs")]
    pub warning_notice_ttl: Duration,

    /// How long mute announcements stay before deletion.
    #[serde(with = "duration_secs")]
    pub mute_notice_ttl: Duration,

    pub templates: MessageTemplates,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        ModerationConfig {
            enabled: true,
            target_channel: None,
            authorized_chats: HashSet::new(),
            operator: None,
            whitelist_users: HashSet::new(),
            whitelist_channels: HashSet::new(),
            violation_limit: DEFAULT_VIOLATION_LIMIT,
            challenge_mute: Duration::seconds(DEFAULT_CHALLENGE_MUTE_SECS),
            challenge_timeout: Duration::seconds(DEFAULT_CHALLENGE_TIMEOUT_SECS),
            mute_ladder_mins: DEFAULT_MUTE_LADDER_MINS.to_vec(),
            warning_notice_ttl: Duration::seconds(DEFAULT_WARNING_NOTICE_SECS),
            mute_notice_ttl: Duration::seconds(DEFAULT_MUTE_NOTICE_SECS),
            templates: MessageTemplates::default(),
        }
    }
}

impl ModerationConfig {
    /// Mute duration for a given escalation level (1-based), saturating at
    /// the last ladder entry. Level 0 never mutes and returns `None`.
    pub fn mute_minutes_for_level(&self, level: u32) -> Option<u32> {
        if level == 0 {
            return None;
        }
        let idx = (level as usize - 1).min(self.mute_ladder_mins.len().saturating_sub(1));
        self.mute_ladder_mins.get(idx).copied()
    }
}

// ─── config source and cache ───

/// Errors from reading the moderation config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where [`ConfigCache`] fetches fresh snapshots from.
pub trait ConfigSource: Send + Sync {
    fn fetch(&self) -> Result<ModerationConfig, ConfigError>;
}

/// A fixed in-memory config, for tests and minimal deployments.
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    config: ModerationConfig,
}

impl StaticConfigSource {
    pub fn new(config: ModerationConfig) -> Self {
        StaticConfigSource { config }
    }
}

impl ConfigSource for StaticConfigSource {
    fn fetch(&self) -> Result<ModerationConfig, ConfigError> {
        Ok(self.config.clone())
    }
}

/// Reads the config from a JSON file, so operators can edit it without a
/// restart. Writes out the defaults on first run so the file is there to edit.
#[derive(Debug)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfigSource { path: path.into() }
    }

    /// Creates the file with default contents if it does not exist.
    pub fn ensure_exists(&self) -> Result<(), ConfigError> {
        if self.path.exists() {
            return Ok(());
        }
        let defaults = serde_json::to_vec_pretty(&ModerationConfig::default())?;
        write_atomic(&self.path, &defaults)?;
        Ok(())
    }
}

impl ConfigSource for FileConfigSource {
    fn fetch(&self) -> Result<ModerationConfig, ConfigError> {
        let bytes = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug)]
struct CacheState {
    snapshot: Option<(ModerationConfig, DateTime<Utc>)>,
    last_known: Option<ModerationConfig>,
}

/// TTL-bounded view over a [`ConfigSource`].
///
/// `current()` never fails: a fetch error falls back to the last good
/// snapshot, and to [`ModerationConfig::default`] if there has never been one.
pub struct ConfigCache {
    source: Box<dyn ConfigSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl ConfigCache {
    pub fn new(source: Box<dyn ConfigSource>, ttl: Duration) -> Self {
        ConfigCache {
            source,
            ttl,
            state: Mutex::new(CacheState {
                snapshot: None,
                last_known: None,
            }),
        }
    }

    pub fn with_default_ttl(source: Box<dyn ConfigSource>) -> Self {
        Self::new(source, Duration::seconds(DEFAULT_CONFIG_TTL_SECS))
    }

    /// The config to apply right now.
    pub fn current(&self) -> ModerationConfig {
        self.current_at(Utc::now())
    }

    pub fn current_at(&self, now: DateTime<Utc>) -> ModerationConfig {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            // A panic while holding the lock loses the cache, not the
            // process; refetch from the source instead.
            Err(_) => {
                return self
                    .source
                    .fetch()
                    .unwrap_or_else(|_| ModerationConfig::default());
            }
        };

        if let Some((config, fetched_at)) = &state.snapshot
            && now - *fetched_at <= self.ttl
        {
            return config.clone();
        }

        match self.source.fetch() {
            Ok(config) => {
                state.snapshot = Some((config.clone(), now));
                state.last_known = Some(config.clone());
                config
            }
            Err(e) => {
                warn!(error = %e, "config fetch failed, using fallback");
                state
                    .last_known
                    .clone()
                    .unwrap_or_else(ModerationConfig::default)
            }
        }
    }
}

// ─── runtime settings ───

/// Process-level settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Bot API token.
    pub bot_token: String,

    /// The bot's own account id, for self-recognition in member updates.
    pub bot_user: UserId,

    /// Expected value of the webhook secret header. `None` disables the check.
    pub webhook_secret: Option<String>,

    /// Address the webhook server binds to.
    pub listen_addr: SocketAddr,

    /// Directory holding the level store, queue slot, and config file.
    pub data_dir: PathBuf,

    /// Interval between deferred-queue sweeps.
    pub sweep_interval: std::time::Duration,
}

impl RuntimeSettings {
    /// Reads settings from the environment.
    ///
    /// `WARDEN_BOT_TOKEN` is required; the bot user id is taken from its
    /// leading numeric component. `WARDEN_WEBHOOK_SECRET`, `WARDEN_LISTEN`,
    /// `WARDEN_DATA_DIR`, and `WARDEN_SWEEP_SECS` are optional.
    pub fn from_env() -> Result<Self, SettingsError> {
        let bot_token =
            std::env::var("WARDEN_BOT_TOKEN").map_err(|_| SettingsError::MissingToken)?;
        let bot_user = bot_token
            .split(':')
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .map(UserId)
            .ok_or(SettingsError::MalformedToken)?;

        let webhook_secret = std::env::var("WARDEN_WEBHOOK_SECRET").ok();

        let listen_addr = match std::env::var("WARDEN_LISTEN") {
            Ok(s) => s.parse().map_err(|_| SettingsError::BadListenAddr(s))?,
            Err(_) => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        let data_dir = std::env::var("WARDEN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let sweep_secs = std::env::var("WARDEN_SWEEP_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);

        Ok(RuntimeSettings {
            bot_token,
            bot_user,
            webhook_secret,
            listen_addr,
            data_dir,
            sweep_interval: std::time::Duration::from_secs(sweep_secs),
        })
    }
}

/// Errors constructing [`RuntimeSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("WARDEN_BOT_TOKEN is not set")]
    MissingToken,

    #[error("WARDEN_BOT_TOKEN does not start with a numeric bot id")]
    MalformedToken,

    #[error("WARDEN_LISTEN is not a valid socket address: {0}")]
    BadListenAddr(String),
}

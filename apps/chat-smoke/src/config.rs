//! Environment-backed configuration for `chat-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use chat_core::{
    DEFAULT_LOAD_OLDER_DELAY, DEFAULT_PAGE_SIZE, SnapshotPolicy, UserProfile, WindowConfig,
};
use url::Url;

const DEFAULT_ME_UID: &str = "alice";
const DEFAULT_ME_NAME: &str = "Alice";
const DEFAULT_PEER_UID: &str = "bob";
const DEFAULT_PEER_NAME: &str = "Bob";
const DEFAULT_SEED_MESSAGES: usize = 250;
const DEFAULT_OBJECT_BASE_URL: &str = "memory://objects/";
const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_EVENT_BUFFER: usize = 512;

/// Runtime configuration used by the smoke session.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Signed-in participant.
    pub me: UserProfile,
    /// Conversation partner selected by the scripted session.
    pub peer: UserProfile,
    /// Number of messages seeded into the conversation before it is opened.
    pub seed_messages: usize,
    /// Message window tuning forwarded to the view state.
    pub window: WindowConfig,
    /// Base URL under which uploaded objects are addressed.
    pub object_base_url: Url,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let me = UserProfile::new(
            trimmed_or("CHAT_SMOKE_ME_UID", DEFAULT_ME_UID, &mut lookup),
            trimmed_or("CHAT_SMOKE_ME_NAME", DEFAULT_ME_NAME, &mut lookup),
        );
        let peer = UserProfile::new(
            trimmed_or("CHAT_SMOKE_PEER_UID", DEFAULT_PEER_UID, &mut lookup),
            trimmed_or("CHAT_SMOKE_PEER_NAME", DEFAULT_PEER_NAME, &mut lookup),
        );
        if me.uid == peer.uid {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_SMOKE_PEER_UID",
                value: peer.uid,
                reason: "must differ from CHAT_SMOKE_ME_UID".to_owned(),
            });
        }

        let seed_messages =
            parse_optional_usize("CHAT_SMOKE_SEED_MESSAGES", DEFAULT_SEED_MESSAGES, &mut lookup)?;
        let page_size =
            parse_optional_usize("CHAT_SMOKE_PAGE_SIZE", DEFAULT_PAGE_SIZE, &mut lookup)?;
        let load_older_delay_ms = parse_optional_u64(
            "CHAT_SMOKE_LOAD_OLDER_DELAY_MS",
            DEFAULT_LOAD_OLDER_DELAY.as_millis() as u64,
            &mut lookup,
        )?;
        let snapshot_policy = parse_snapshot_policy(&mut lookup)?;
        let object_base_url = parse_base_url(&mut lookup)?;
        let command_buffer =
            parse_optional_usize("CHAT_SMOKE_COMMAND_BUFFER", DEFAULT_COMMAND_BUFFER, &mut lookup)?;
        let event_buffer =
            parse_optional_usize("CHAT_SMOKE_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_SMOKE_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_SMOKE_EVENT_BUFFER",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            me,
            peer,
            seed_messages,
            window: WindowConfig {
                page_size,
                load_older_delay: Duration::from_millis(load_older_delay_ms),
                snapshot_policy,
            },
            object_base_url,
            command_buffer,
            event_buffer,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn trimmed_or<F>(key: &'static str, default: &str, lookup: &mut F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_snapshot_policy<F>(lookup: &mut F) -> Result<SnapshotPolicy, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup("CHAT_SMOKE_SNAPSHOT_POLICY") else {
        return Ok(SnapshotPolicy::default());
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "merge" => Ok(SnapshotPolicy::Merge),
        "reset" => Ok(SnapshotPolicy::Reset),
        _ => Err(ConfigError::InvalidValue {
            key: "CHAT_SMOKE_SNAPSHOT_POLICY",
            value,
            reason: "expected 'merge' or 'reset'".to_owned(),
        }),
    }
}

fn parse_base_url<F>(lookup: &mut F) -> Result<Url, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    const KEY: &str = "CHAT_SMOKE_OBJECT_BASE_URL";
    let value = trimmed_or(KEY, DEFAULT_OBJECT_BASE_URL, lookup);
    let url = Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key: KEY,
        value: value.clone(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() || !url.path().ends_with('/') {
        return Err(ConfigError::InvalidValue {
            key: KEY,
            value,
            reason: "must be a base URL ending with '/'".to_owned(),
        });
    }
    Ok(url)
}

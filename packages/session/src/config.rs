//! Session configuration.
//!
//! Defaults suit a local development server. [`SessionConfig::from_env`]
//! overrides them from `DUET_*` environment variables.

use std::time::Duration;

use duet_env_utils::{EnvParseError, default_env, default_env_u32, default_env_u64};
use duet_session_models::TopicKey;
use thiserror::Error;
use url::Url;

use crate::backoff::{ExponentialBackoff, LinearBackoff, RetryPolicy};

pub const DEFAULT_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ROOM_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_ROOM_RETRY_STEP_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvParseError),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("Unsupported endpoint scheme '{0}'")]
    Scheme(String),
}

/// Server-side destination naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub personal: String,
    pub matching: String,
    pub system: String,
    /// Room topics are `{room_topic_prefix}{room_id}`.
    pub room_topic_prefix: String,
    pub chat_send_prefix: String,
    pub share_music_prefix: String,
    pub matching_request: String,
    pub ping: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            personal: "/user/queue/personal".to_string(),
            matching: "/user/queue/matching-result".to_string(),
            system: "/topic/system-status".to_string(),
            room_topic_prefix: "/topic/room.".to_string(),
            chat_send_prefix: "/app/chat.send/room.".to_string(),
            share_music_prefix: "/app/chat.share/room.".to_string(),
            matching_request: "/app/matching.request".to_string(),
            ping: "/app/ping".to_string(),
        }
    }
}

impl Destinations {
    /// Address of a standing topic. Room keys have no fixed address.
    #[must_use]
    pub fn standing(&self, key: TopicKey) -> Option<&str> {
        match key {
            TopicKey::Personal => Some(&self.personal),
            TopicKey::Matching => Some(&self.matching),
            TopicKey::System => Some(&self.system),
            TopicKey::Chat | TopicKey::ChatNormalized => None,
        }
    }

    #[must_use]
    pub fn room_topic(&self, room_id: &str) -> String {
        format!("{}{room_id}", self.room_topic_prefix)
    }

    #[must_use]
    pub fn chat_send(&self, room_id: &str) -> String {
        format!("{}{room_id}", self.chat_send_prefix)
    }

    #[must_use]
    pub fn share_music(&self, room_id: &str) -> String {
        format!("{}{room_id}", self.share_music_prefix)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint; the identity is appended as a query parameter.
    pub url: String,
    /// Query parameter and `CONNECT` header carrying the identity.
    pub identity_param: String,
    pub reconnect: RetryPolicy<ExponentialBackoff>,
    pub room_retry: RetryPolicy<LinearBackoff>,
    /// Symmetric heart-beat interval. Zero disables heart-beating.
    pub heartbeat: Duration,
    /// Pause between the handshake completing and the first subscriptions.
    pub settle_delay: Duration,
    /// Longest wait from opening the socket to receiving `CONNECTED`.
    pub connect_timeout: Duration,
    pub destinations: Destinations,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            identity_param: "userId".to_string(),
            reconnect: RetryPolicy {
                max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
                delay: ExponentialBackoff {
                    base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
                    cap: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
                },
            },
            room_retry: RetryPolicy {
                max_attempts: DEFAULT_ROOM_RETRY_ATTEMPTS,
                delay: LinearBackoff {
                    step: Duration::from_millis(DEFAULT_ROOM_RETRY_STEP_MS),
                },
            },
            heartbeat: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            destinations: Destinations::default(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Reads overrides from the environment.
    ///
    /// # Errors
    ///
    /// * If a `DUET_*` variable is set to an unparseable value
    /// * If `DUET_WS_URL` is not a `ws://` or `wss://` URL
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            url: default_env("DUET_WS_URL", DEFAULT_URL),
            reconnect: RetryPolicy {
                max_attempts: default_env_u32(
                    "DUET_RECONNECT_MAX_ATTEMPTS",
                    DEFAULT_RECONNECT_MAX_ATTEMPTS,
                )?,
                delay: ExponentialBackoff {
                    base: Duration::from_millis(default_env_u64(
                        "DUET_RECONNECT_BASE_MS",
                        DEFAULT_RECONNECT_BASE_MS,
                    )?),
                    cap: Duration::from_millis(default_env_u64(
                        "DUET_RECONNECT_MAX_MS",
                        DEFAULT_RECONNECT_MAX_MS,
                    )?),
                },
            },
            room_retry: RetryPolicy {
                max_attempts: default_env_u32(
                    "DUET_ROOM_RETRY_ATTEMPTS",
                    DEFAULT_ROOM_RETRY_ATTEMPTS,
                )?,
                delay: LinearBackoff {
                    step: Duration::from_millis(default_env_u64(
                        "DUET_ROOM_RETRY_STEP_MS",
                        DEFAULT_ROOM_RETRY_STEP_MS,
                    )?),
                },
            },
            heartbeat: Duration::from_millis(default_env_u64(
                "DUET_HEARTBEAT_MS",
                DEFAULT_HEARTBEAT_MS,
            )?),
            settle_delay: Duration::from_millis(default_env_u64(
                "DUET_SETTLE_DELAY_MS",
                DEFAULT_SETTLE_DELAY_MS,
            )?),
            connect_timeout: Duration::from_millis(default_env_u64(
                "DUET_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?),
            ..Self::default()
        };

        config.endpoint()?;

        Ok(config)
    }

    /// Parses and checks [`Self::url`].
    ///
    /// # Errors
    ///
    /// * If the URL does not parse or is not `ws`/`wss`
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url)?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(ConfigError::Scheme(scheme.to_string())),
        }
    }
}

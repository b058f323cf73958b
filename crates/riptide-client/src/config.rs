//! Client configuration.
//!
//! [`ClientConfig`] carries the service keys, client identity, timeouts,
//! presence settings, and the reconnection policy. All duration fields
//! serialize as millisecond counts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Serde helper: Duration as milliseconds
// ---------------------------------------------------------------------------

/// Serde helper that encodes a [`Duration`] as a `u64` millisecond count.
mod duration_millis {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Same as [`duration_millis`] but for `Option<Duration>`.
mod opt_duration_millis {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation, clippy::ref_option)]
    pub fn serialize<S>(d: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match d {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

// ---------------------------------------------------------------------------
// Default helpers
// ---------------------------------------------------------------------------

/// Default service origin.
fn default_origin() -> String {
    "edge.riptide.net".to_string()
}

/// Randomly generated client identity used when none is configured.
fn default_user_id() -> String {
    format!("rt-{}", uuid::Uuid::new_v4())
}

/// Returns `true` (used for `#[serde(default)]` on boolean fields).
const fn default_true() -> bool {
    true
}

/// Default long-poll window: 280 seconds.
///
/// Must exceed the server-side poll timeout so an idle poll completes
/// with an empty envelope instead of a client-side timeout.
const fn default_subscribe_timeout() -> Duration {
    Duration::from_secs(280)
}

/// Default timeout for one-shot requests: 10 seconds.
const fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Default presence timeout advertised to the service: 300 seconds.
const fn default_presence_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Default reconnect initial delay: 2 seconds.
const fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

/// Default reconnect maximum delay: 32 seconds.
const fn default_max_delay() -> Duration {
    Duration::from_secs(32)
}

/// Default exponential backoff multiplier.
const fn default_backoff_multiplier() -> f64 {
    2.0
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Configuration for a subscription manager instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Subscribe key identifying the application on the service.
    pub subscribe_key: String,

    /// Client identity reported on every request.
    ///
    /// Presence events attribute joins, leaves, and state changes to this
    /// id. Defaults to a random `rt-<uuid>` value.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Service origin host.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Whether to use TLS when talking to the service.
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Client-side cap on a single long-poll request.
    #[serde(default = "default_subscribe_timeout", with = "duration_millis")]
    pub subscribe_timeout: Duration,

    /// Timeout for one-shot requests (heartbeat, state, leave).
    #[serde(default = "default_request_timeout", with = "duration_millis")]
    pub request_timeout: Duration,

    /// Presence timeout and heartbeat cadence.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Reconnection policy applied to transient poll failures.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Optional server-side filter expression applied to subscribe polls.
    pub filter_expression: Option<String>,
}

impl ClientConfig {
    /// Creates a configuration with the given subscribe key and defaults
    /// for everything else.
    #[must_use]
    pub fn new(subscribe_key: impl Into<String>) -> Self {
        Self {
            subscribe_key: subscribe_key.into(),
            user_id: default_user_id(),
            origin: default_origin(),
            secure: true,
            subscribe_timeout: default_subscribe_timeout(),
            request_timeout: default_request_timeout(),
            presence: PresenceConfig::default(),
            reconnect: ReconnectConfig::default(),
            filter_expression: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PresenceConfig
// ---------------------------------------------------------------------------

/// Presence timeout and heartbeat scheduling.
///
/// The service drops a client from channel occupancy when it has not
/// heard from it for `timeout`. The heartbeat task announces liveness
/// every `interval`; when `interval` is `None` no heartbeat task runs
/// and liveness is carried by the subscribe polls alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Occupancy timeout advertised to the service.
    #[serde(default = "default_presence_timeout", with = "duration_millis")]
    pub timeout: Duration,

    /// Interval between heartbeat requests (`None` = heartbeats disabled).
    #[serde(default, with = "opt_duration_millis")]
    pub interval: Option<Duration>,
}

impl PresenceConfig {
    /// Builds a presence configuration from the occupancy timeout,
    /// deriving the heartbeat interval as `timeout / 2 - 1` seconds.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let secs = timeout.as_secs();
        let interval = (secs / 2).saturating_sub(1).max(1);
        Self {
            timeout,
            interval: Some(Duration::from_secs(interval)),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            timeout: default_presence_timeout(),
            interval: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Exponential-backoff reconnection policy for the subscribe loop.
///
/// Transient poll failures are retried with exponentially increasing,
/// jittered delays capped at `max_delay`. When `max_retries` is set and
/// exceeded, a `Disconnected` status is emitted once and retries
/// continue at the capped interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Whether automatic reconnection is enabled.
    ///
    /// When disabled, the first transient failure emits `Disconnected`
    /// and the loop parks until the subscription set changes.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Initial delay before the first retry.
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each consecutive failure.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Attempt count after which `Disconnected` is emitted.
    ///
    /// `None` means the status stays at `ReconnectionAttempt` however
    /// long the outage lasts.
    pub max_retries: Option<u32>,

    /// Whether to apply jitter to backoff delays to avoid thundering-herd.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: None,
            jitter: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

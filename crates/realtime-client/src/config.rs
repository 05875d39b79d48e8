//! Client configuration: endpoint, heartbeat, and reconnect policy.
//!
//! Durations are expressed in milliseconds when (de)serialized, e.g.
//!
//! ```yaml
//! url: wss://app.example.com/ws
//! ping_interval_ms: 30000
//! reconnect:
//!   base_delay_ms: 1000
//!   max_delay_ms: 30000
//!   max_attempts: 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::protocol::endpoint_for;

pub(crate) const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";
pub(crate) const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    #[serde(rename = "ping_interval_ms", with = "millis")]
    pub ping_interval: Duration,
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Resend the credentials of the last explicit `connect()` on automatic
    /// reconnects. When `false`, reconnects come back unauthenticated.
    pub retain_credentials: bool,
    /// Re-subscribe to every channel the caller still wants once a
    /// reconnected session authenticates.
    pub restore_subscriptions: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            retain_credentials: true,
            restore_subscriptions: true,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Config pointing at the push endpoint of the page served from `page_url`.
    pub fn for_page(page_url: &str) -> Result<Self, Error> {
        Ok(Self::new(endpoint_for(page_url)?.to_string()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        let url = url::Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        }
        if self.ping_interval.is_zero() {
            return Err(Error::Config("ping_interval_ms must be positive".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.base_delay > self.reconnect.max_delay {
            return Err(Error::Config(format!(
                "reconnect.base_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                self.reconnect.base_delay.as_millis(),
                self.reconnect.max_delay.as_millis(),
            )));
        }
        Ok(())
    }
}

/// Load and validate a client config from a YAML file.
pub async fn load(path: &Path) -> Result<ClientConfig, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
    let config: ClientConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff: `min(base_delay * 2^attempt, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the reconnect that follows `attempt` earlier attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

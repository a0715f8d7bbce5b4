use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults;
use crate::error::{CoreError, Result};

/// Client configuration
///
/// The keep-alive interval and retry delay are tied to the remote service's
/// tolerance, so they are configurable rather than fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub websocket_url: String,

    /// IP-metadata endpoint queried through each proxy
    pub ip_check_url: String,

    #[serde(with = "millis")]
    pub keep_alive_interval: Duration,

    #[serde(with = "millis")]
    pub retry_delay: Duration,

    /// Random delay in `[0, connect_jitter]` before every connect attempt
    #[serde(with = "millis")]
    pub connect_jitter: Duration,

    /// Connect timeout for route validation
    #[serde(with = "millis")]
    pub validation_timeout: Duration,

    /// Static upgrade headers
    pub headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            websocket_url: defaults::DEFAULT_WEBSOCKET_URL.to_string(),
            ip_check_url: defaults::DEFAULT_IP_CHECK_URL.to_string(),
            keep_alive_interval: Duration::from_secs(defaults::DEFAULT_KEEP_ALIVE_SECS),
            retry_delay: Duration::from_secs(defaults::DEFAULT_RETRY_DELAY_SECS),
            connect_jitter: Duration::from_millis(defaults::DEFAULT_CONNECT_JITTER_MS),
            validation_timeout: Duration::from_secs(defaults::DEFAULT_VALIDATION_TIMEOUT_SECS),
            headers: defaults::DEFAULT_HEADERS
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    pub fn with_ip_check_url(mut self, url: impl Into<String>) -> Self {
        self.ip_check_url = url.into();
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_connect_jitter(mut self, jitter: Duration) -> Self {
        self.connect_jitter = jitter;
        self
    }

    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Reject settings no session could run with
    pub fn validate(&self) -> Result<()> {
        if self.keep_alive_interval.is_zero() {
            return Err(CoreError::Configuration(
                "keep-alive interval must be greater than zero".to_string(),
            ));
        }
        if !(self.websocket_url.starts_with("ws://") || self.websocket_url.starts_with("wss://")) {
            return Err(CoreError::Configuration(format!(
                "websocket url '{}' must start with ws:// or wss://",
                self.websocket_url
            )));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

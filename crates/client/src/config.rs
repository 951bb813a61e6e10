//! Client configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ClientError;
use crate::ws::ReconnectPolicy;

/// Auto-reconnect settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnects scheduled before giving up and going offline.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first reconnect, doubled for every following one.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single reconnect delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Settings for one live auction client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base WebSocket URL of the auction server (`ws://` or `wss://`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Path of the live endpoint, appended to `endpoint`.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Notifications kept before the oldest is evicted.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// Bids awaiting a `bid_confirmation` that are remembered for correlation.
    #[serde(default = "default_pending_bid_capacity")]
    pub pending_bid_capacity: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_endpoint() -> String {
    "ws://localhost:5000".to_string()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_notification_capacity() -> usize {
    50
}

fn default_pending_bid_capacity() -> usize {
    32
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            ws_path: default_ws_path(),
            connect_timeout_ms: default_connect_timeout_ms(),
            notification_capacity: default_notification_capacity(),
            pending_bid_capacity: default_pending_bid_capacity(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }),
        Err(_) => default,
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Read configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MZAD_SOCKET_URL`: server base URL (default: "ws://localhost:5000")
    /// - `MZAD_WS_PATH`: live endpoint path (default: "/ws")
    /// - `MZAD_CONNECT_TIMEOUT_MS`: connect timeout (default: 10000)
    /// - `MZAD_RECONNECT_MAX_ATTEMPTS`: reconnect budget (default: 5)
    /// - `MZAD_RECONNECT_BASE_MS`: first reconnect delay (default: 1000)
    /// - `MZAD_RECONNECT_MAX_MS`: reconnect delay cap (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: env_or("MZAD_SOCKET_URL", defaults.endpoint),
            ws_path: env_or("MZAD_WS_PATH", defaults.ws_path),
            connect_timeout_ms: env_or("MZAD_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
            notification_capacity: defaults.notification_capacity,
            pending_bid_capacity: defaults.pending_bid_capacity,
            reconnect: ReconnectConfig {
                max_attempts: env_or("MZAD_RECONNECT_MAX_ATTEMPTS", defaults.reconnect.max_attempts),
                base_delay_ms: env_or("MZAD_RECONNECT_BASE_MS", defaults.reconnect.base_delay_ms),
                max_delay_ms: env_or("MZAD_RECONNECT_MAX_MS", defaults.reconnect.max_delay_ms),
            },
        }
    }

    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the settings before a client is built from them.
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidConfig(format!(
                "endpoint scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "reconnect base delay must be > 0".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ClientError::InvalidConfig(
                "reconnect max delay must be >= base delay".to_string(),
            ));
        }
        if self.notification_capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "notification capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Full URL for one connection attempt, with the bearer token as query parameter.
    pub fn connection_url(&self, token: &str) -> Result<String, ClientError> {
        let mut url = Url::parse(&self.endpoint)?;
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            self.ws_path.trim_start_matches('/')
        );
        url.set_path(&path);
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }
}

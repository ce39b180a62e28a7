//! Client configuration.
//!
//! [`PullConfig`] holds the connection tunables; [`ClientSettings`] is the
//! JSON settings file read by the `pullwire` binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionParams;
use crate::error::SettingsError;
use crate::models::Channel;

/// Default interval between keep-alive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Default ping timeout; the keep-alive deadline is twice this value.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling for the reconnect delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Number of recent message ids remembered for de-duplication.
pub const DEFAULT_DEDUP_WINDOW: usize = 10;

/// Tunables for the connection manager.
///
/// # Example
///
/// ```ignore
/// use pullwire::config::PullConfig;
///
/// let config = PullConfig::default()
///     .with_ping_interval(Duration::from_secs(20))
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PullConfig {
    /// How often a ping is sent while online (default: 25s)
    pub ping_interval: Duration,
    /// Ping timeout; no traffic for twice this long after a ping forces a reconnect (default: 10s)
    pub ping_timeout: Duration,
    /// Delay of the first reconnect attempt; doubles each attempt (default: 1s)
    pub backoff_base: Duration,
    /// Reconnect delay ceiling (default: 300s)
    pub backoff_max: Duration,
    /// Give up after this many consecutive failed attempts (default: never)
    pub max_reconnect_attempts: Option<u32>,
    /// Limit for a single connect + handshake (default: 15s)
    pub connect_timeout: Duration,
    /// Bound for the consumer queue (default: unbounded)
    pub event_queue_capacity: Option<usize>,
    /// Message ids remembered for duplicate suppression (default: 10)
    pub dedup_window: usize,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            backoff_base: Duration::from_secs(1),
            backoff_max: DEFAULT_BACKOFF_MAX,
            max_reconnect_attempts: None,
            connect_timeout: Duration::from_secs(15),
            event_queue_capacity: None,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl PullConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window;
        self
    }

    /// Silence allowed after a ping before the connection is declared dead.
    pub fn keepalive_deadline(&self) -> Duration {
        self.ping_timeout * 2
    }

    /// Defaults overlaid with `PULLWIRE_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("PULLWIRE_PING_INTERVAL_SECS") {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("PULLWIRE_PING_TIMEOUT_SECS") {
            config.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("PULLWIRE_BACKOFF_MAX_SECS") {
            config.backoff_max = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("PULLWIRE_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = Some(attempts);
        }
        if let Some(capacity) = env_parse::<usize>("PULLWIRE_EVENT_QUEUE_CAPACITY") {
            config.event_queue_capacity = Some(capacity);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Settings file consumed by the binary (`~/.pullwire/settings.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// `ws://` or `wss://` endpoint of the pull server
    pub endpoint: String,
    /// Value of the `Origin` header
    pub origin: String,
    pub user_id: i64,
    pub site_id: String,
    /// Overrides the local machine's hostname in the connect URL
    #[serde(default)]
    pub hostname: Option<String>,
    pub channels: Vec<Channel>,
    /// Overrides the default session file location
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

impl ClientSettings {
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let home = dirs::home_dir().ok_or(SettingsError::NoHomeDir)?;
        Ok(home.join(".pullwire").join("settings.json"))
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Self =
            serde_json::from_str(&raw).map_err(|e| SettingsError::Invalid(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(SettingsError::Invalid(format!(
                "endpoint must be a ws:// or wss:// URL, got '{}'",
                self.endpoint
            )));
        }
        if self.channels.is_empty() {
            return Err(SettingsError::Invalid("no channels configured".to_string()));
        }
        Ok(())
    }

    /// Connection parameters for [`ConnectionManager::start`](crate::connection::ConnectionManager::start).
    pub fn connection_params(&self) -> ConnectionParams {
        let params = ConnectionParams::new(&self.endpoint, &self.origin, self.user_id, &self.site_id);
        match &self.hostname {
            Some(hostname) => params.with_hostname(hostname),
            None => params,
        }
    }
}

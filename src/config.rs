//! Client configuration parsed from environment variables.
//!
//! Every knob has a default matching the board backend's stock deployment,
//! so an empty environment yields a working local client.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_TYPING_TTL_MS: u64 = 3000;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_STORAGE_PATH: &str = ".kanban-sync.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Typed client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// HTTP origin of the backend, without the `/api` suffix.
    pub base_url: String,
    /// Interval between polling ticks for board chat.
    pub poll_interval: Duration,
    /// How long a typing notice keeps a sender marked as typing.
    pub typing_ttl: Duration,
    /// First reconnect delay after a dropped socket.
    pub backoff_initial: Duration,
    /// Upper bound for reconnect delays.
    pub backoff_max: Duration,
    /// Quiet period before a user search is issued.
    pub search_debounce: Duration,
    /// Per-request timeout for REST calls.
    pub request_timeout: Duration,
    /// Location of the persisted key-value store.
    pub storage_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            typing_ttl: Duration::from_millis(DEFAULT_TYPING_TTL_MS),
            backoff_initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            search_debounce: Duration::from_millis(DEFAULT_SEARCH_DEBOUNCE_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }
}

impl ClientConfig {
    /// Build config from environment variables.
    ///
    /// - `KANBAN_BASE_URL`: backend origin (default `http://localhost:8080`)
    /// - `KANBAN_POLL_INTERVAL_MS`: default 5000
    /// - `KANBAN_TYPING_TTL_MS`: default 3000
    /// - `KANBAN_BACKOFF_INITIAL_MS` / `KANBAN_BACKOFF_MAX_MS`: default 1000 / 30000
    /// - `KANBAN_SEARCH_DEBOUNCE_MS`: default 300
    /// - `KANBAN_REQUEST_TIMEOUT_SECS`: default 15
    /// - `KANBAN_STORAGE_PATH`: default `.kanban-sync.json`
    ///
    /// Zero is not a valid interval, TTL, backoff or timeout; those fall back
    /// to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("KANBAN_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let storage_path = std::env::var("KANBAN_STORAGE_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH), PathBuf::from);

        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            poll_interval: Duration::from_millis(env_parse_nonzero("KANBAN_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)),
            typing_ttl: Duration::from_millis(env_parse_nonzero("KANBAN_TYPING_TTL_MS", DEFAULT_TYPING_TTL_MS)),
            backoff_initial: Duration::from_millis(env_parse_nonzero("KANBAN_BACKOFF_INITIAL_MS", DEFAULT_BACKOFF_INITIAL_MS)),
            backoff_max: Duration::from_millis(env_parse_nonzero("KANBAN_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS)),
            search_debounce: Duration::from_millis(env_parse("KANBAN_SEARCH_DEBOUNCE_MS", DEFAULT_SEARCH_DEBOUNCE_MS)),
            request_timeout: Duration::from_secs(env_parse_nonzero("KANBAN_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)),
            storage_path,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Absolute REST URL for an `/api`-relative path.
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Absolute WebSocket URL for an `/api`-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] unless the base URL is `http://` or `https://`.
    pub fn ws_url(&self, path: &str) -> Result<String, ConfigError> {
        if let Some(rest) = self.base_url.strip_prefix("http://") {
            return Ok(format!("ws://{rest}/api{path}"));
        }
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            return Ok(format!("wss://{rest}/api{path}"));
        }

        Err(ConfigError::InvalidBaseUrl(self.base_url.clone()))
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Like [`env_parse`], but a zero value also yields the default.
pub(crate) fn env_parse_nonzero(key: &str, default: u64) -> u64 {
    Some(env_parse(key, default)).filter(|v| *v > 0).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

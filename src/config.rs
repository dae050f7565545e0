//! Configuration Module
//!
//! Handles loading and managing gateway configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Gateway configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// TTL in milliseconds for responses cached without an explicit TTL
    pub default_ttl_ms: u64,
    /// Maximum number of cached responses, 0 = unbounded
    pub max_entries: usize,
    /// Expired-entry sweep interval in seconds, 0 = disabled
    pub cleanup_interval: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Base URL of the API being cached
    pub upstream_url: String,
    /// Upstream request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 300000)
    /// - `MAX_ENTRIES` - Maximum cache entries, 0 for no cap (default: 0)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds, 0 to disable (default: 60)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `UPSTREAM_URL` - Upstream API base URL (default: http://127.0.0.1:8080)
    /// - `REQUEST_TIMEOUT_MS` - Upstream timeout in milliseconds (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_ttl_ms: env_or("DEFAULT_TTL_MS", defaults.default_ttl_ms),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            upstream_url: env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            request_timeout_ms: env_or("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl_ms: 300_000,
            max_entries: 0,
            cleanup_interval: 60,
            server_port: 3000,
            upstream_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Parses an environment variable, falling back when unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

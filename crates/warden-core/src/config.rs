//! Runtime configuration loaded from the environment.

use std::env;

/// Environment variable names.
pub mod env_vars {
    pub const BIND_ADDR: &str = "WARDEN_BIND_ADDR";
    pub const STORAGE_PATH: &str = "WARDEN_STORAGE_PATH";
    pub const COMMAND_TIMEOUT_SECS: &str = "WARDEN_COMMAND_TIMEOUT_SECS";
    pub const ENCRYPTION_KEY: &str = "WARDEN_ENCRYPTION_KEY";
}

/// Default values.
pub mod defaults {
    /// Default API bind address
    pub const BIND_ADDR: &str = "0.0.0.0:8090";
    /// Default storage database path
    pub const STORAGE_PATH: &str = "./data/warden.redb";
    /// Default per-command timeout in seconds
    pub const COMMAND_TIMEOUT_SECS: u64 = 10;
    /// Base delay for sync retry backoff in milliseconds
    pub const SYNC_BACKOFF_BASE_MS: u64 = 250;
    /// Cap for sync retry backoff in milliseconds
    pub const SYNC_BACKOFF_CAP_MS: u64 = 5_000;
}

/// Process-level runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// API server bind address
    pub bind_addr: String,
    /// Path to the redb storage file
    pub storage_path: String,
    /// Default per-command timeout (seconds) when a device configuration
    /// does not override it
    pub command_timeout_secs: u64,
    /// Base delay for per-device retry backoff (milliseconds)
    pub sync_backoff_base_ms: u64,
    /// Upper bound for per-device retry backoff (milliseconds)
    pub sync_backoff_cap_ms: u64,
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let command_timeout_secs = env::var(env_vars::COMMAND_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::COMMAND_TIMEOUT_SECS);

        Self {
            bind_addr: env::var(env_vars::BIND_ADDR)
                .unwrap_or_else(|_| defaults::BIND_ADDR.to_string()),
            storage_path: env::var(env_vars::STORAGE_PATH)
                .unwrap_or_else(|_| defaults::STORAGE_PATH.to_string()),
            command_timeout_secs,
            sync_backoff_base_ms: defaults::SYNC_BACKOFF_BASE_MS,
            sync_backoff_cap_ms: defaults::SYNC_BACKOFF_CAP_MS,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: defaults::BIND_ADDR.to_string(),
            storage_path: defaults::STORAGE_PATH.to_string(),
            command_timeout_secs: defaults::COMMAND_TIMEOUT_SECS,
            sync_backoff_base_ms: defaults::SYNC_BACKOFF_BASE_MS,
            sync_backoff_cap_ms: defaults::SYNC_BACKOFF_CAP_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.command_timeout_secs, 10);
        assert!(config.sync_backoff_base_ms < config.sync_backoff_cap_ms);
    }
}

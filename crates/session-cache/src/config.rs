use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redis_url: String,
    /// Upper bound for a single store round-trip.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Set to "production" for JSON logging, anything else for human-readable.
    #[serde(default)]
    pub env: String,
    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default = "default_refresh_token_max_per_user")]
    pub refresh_token_max_per_user: usize,
    #[serde(default = "default_trusted_device_ttl_secs")]
    pub trusted_device_ttl_secs: u64,
    #[serde(default = "default_trusted_device_max_per_user")]
    pub trusted_device_max_per_user: usize,
}

impl Config {
    /// Load from `SESSION_CACHE_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(envy::prefixed("SESSION_CACHE_").from_env::<Config>()?)
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_command_timeout_ms() -> u64 {
    2_000
}

fn default_refresh_token_ttl_secs() -> u64 {
    keys::REFRESH_TOKEN_TTL_SECS
}

fn default_refresh_token_max_per_user() -> usize {
    keys::REFRESH_TOKEN_MAX_PER_USER
}

fn default_trusted_device_ttl_secs() -> u64 {
    keys::TRUSTED_DEVICE_TTL_SECS
}

fn default_trusted_device_max_per_user() -> usize {
    keys::TRUSTED_DEVICE_MAX_PER_USER
}

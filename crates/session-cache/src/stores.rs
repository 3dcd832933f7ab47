//! Ephemeral stores (Redis).
//!
//! Everything here lives under a TTL; nothing is retained past its window.
//!
//! ## Stores
//!
//! - **kv** - Primitive single-key operations (`KeyValueStore`) and the Redis backend
//! - **memory** - In-process backend with the same semantics, for tests and local runs
//! - **collection** - Bounded per-user collections behind a secondary index
//! - **tokens** - Single ephemeral tokens with a metadata envelope
//! - **rate_limit** - Per-identity windows and per-token burn counters
//! - **refresh_tokens** - Login sessions (7 day TTL, 5 per user)
//! - **trusted_devices** - Devices that may skip 2FA (30 day TTL, 10 per user)
//!
//! ## Usage
//!
//! ```ignore
//! let stores = Stores::connect(&config)?;
//! stores.trusted_devices.trust(&device).await?;
//! let live = stores.refresh_tokens.list(&user_id).await?;
//! ```

mod collection;
mod kv;
mod memory;
mod rate_limit;
mod refresh_tokens;
mod tokens;
mod trusted_devices;

pub use collection::{CollectionConfig, ItemIdFn, KeyedCollectionRepository, LastActiveFn};
pub use kv::{JsonStoreExt, KeyValueStore, RedisKeyValueStore, TTL_MISSING, TTL_NO_EXPIRY};
pub use memory::MemoryKeyValueStore;
pub use rate_limit::{AttemptCounter, AttemptOutcome, RateLimitPolicy, RateLimitResult, RateLimiter};
pub use refresh_tokens::RefreshTokenRepository;
pub use tokens::{TokenOptions, TokenStore};
pub use trusted_devices::TrustedDeviceRepository;

#[cfg(test)]
pub use kv::MockKeyValueStore;

use std::sync::Arc;

use crate::config::Config;

/// Collection of all ephemeral stores sharing one backend.
#[derive(Clone)]
pub struct Stores {
    pub kv: Arc<dyn KeyValueStore>,
    pub tokens: TokenStore,
    pub refresh_tokens: RefreshTokenRepository,
    pub trusted_devices: TrustedDeviceRepository,
}

impl Stores {
    /// Build every store against the Redis instance at `config.redis_url`.
    ///
    /// No connection is made until the first command.
    pub fn connect(config: &Config) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let kv = Arc::new(RedisKeyValueStore::new(client, config.command_timeout()));
        tracing::info!(timeout_ms = config.command_timeout_ms, "session cache configured");
        Ok(Self::with_backend(kv, config))
    }

    /// Build every store on an existing backend.
    pub fn with_backend(kv: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self {
            tokens: TokenStore::new(kv.clone()),
            refresh_tokens: RefreshTokenRepository::new(
                kv.clone(),
                config.refresh_token_ttl_secs,
                config.refresh_token_max_per_user,
            ),
            trusted_devices: TrustedDeviceRepository::new(
                kv.clone(),
                config.trusted_device_ttl_secs,
                config.trusted_device_max_per_user,
            ),
            kv,
        }
    }

    pub fn rate_limiter(&self, policy: RateLimitPolicy) -> RateLimiter {
        RateLimiter::new(self.kv.clone(), policy)
    }

    pub fn attempt_counter(
        &self,
        context: &str,
        max_attempts: u32,
        window_secs: u64,
    ) -> AttemptCounter {
        AttemptCounter::new(self.kv.clone(), context, max_attempts, window_secs)
    }
}

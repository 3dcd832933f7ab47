//! Ephemeral session artifacts and authentication rate limits on a TTL
//! key-value store.
//!
//! Refresh tokens, trusted devices, 2FA codes and reset links are short-lived,
//! per-user records. They live in Redis under deterministic keys with
//! store-enforced expiry, and every operation uses single-key primitives only
//! (no transactions, no client-side locks).
//!
//! ```ignore
//! let config = Config::from_env()?;
//! telemetry::init(&config)?;
//! let stores = Stores::connect(&config)?;
//!
//! let login = LoginThrottle::new(&stores);
//! login.guard(&email).await?;
//! ```

pub mod config;
pub mod error;
pub mod flows;
pub mod keys;
pub mod models;
pub mod stores;
pub mod telemetry;
#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{CacheError, Result};
pub use flows::{LoginThrottle, OneTimeTokens, TwoFactorChallenge, TwoFactorCodes, TwoFactorOutcome};
pub use models::{RefreshTokenRecord, TokenEnvelope, TrustedDevice};
pub use stores::{
    AttemptCounter, AttemptOutcome, CollectionConfig, JsonStoreExt, KeyValueStore,
    KeyedCollectionRepository, MemoryKeyValueStore, RateLimitPolicy, RateLimitResult, RateLimiter,
    RedisKeyValueStore, RefreshTokenRepository, Stores, TokenOptions, TokenStore,
    TrustedDeviceRepository,
};

//! Shared test utilities.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::test_utils::memory_stores;
//!
//! let (backend, stores) = memory_stores();
//! stores.trusted_devices.trust(&device).await?;
//! backend.expire_now("trusted-device:u1:laptop");
//! ```

use std::sync::Arc;

use crate::config::Config;
use crate::keys;
use crate::stores::{MemoryKeyValueStore, Stores};

/// Creates a test configuration with dummy values.
pub fn test_config() -> Config {
    Config {
        redis_url: "redis://127.0.0.1:6379".to_string(),
        command_timeout_ms: 500,
        env: "test".to_string(),
        refresh_token_ttl_secs: keys::REFRESH_TOKEN_TTL_SECS,
        refresh_token_max_per_user: keys::REFRESH_TOKEN_MAX_PER_USER,
        trusted_device_ttl_secs: keys::TRUSTED_DEVICE_TTL_SECS,
        trusted_device_max_per_user: keys::TRUSTED_DEVICE_MAX_PER_USER,
    }
}

/// All stores on a fresh in-memory backend. The backend handle lets tests
/// inspect keys or simulate expiry.
pub fn memory_stores() -> (Arc<MemoryKeyValueStore>, Stores) {
    let backend = Arc::new(MemoryKeyValueStore::new());
    let stores = Stores::with_backend(backend.clone(), &test_config());
    (backend, stores)
}

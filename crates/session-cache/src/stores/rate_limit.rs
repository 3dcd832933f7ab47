//! Fixed-window rate limiting on store counters.
//!
//! Two policies share the INCR + EXPIRE primitive:
//!
//! - [`RateLimiter`] counts per identity (email, IP) under
//!   `rate-limit:{context}:{identity}` and is cleared on success.
//! - [`AttemptCounter`] counts guesses against one single-use secret under
//!   `attempts:{context}:{token_id}` and burns the secret once exceeded.

use std::sync::Arc;

use super::kv::{KeyValueStore, TTL_NO_EXPIRY};
use crate::error::{CacheError, Result};
use crate::keys;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Under the limit, includes current count.
    Allowed(i64),
    /// Over the limit, includes current count.
    Exceeded(i64),
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// `{feature}:{limit_type}`, e.g. `login:failed`.
    pub context: String,
    pub max_attempts: u32,
    pub window_minutes: u64,
}

impl RateLimitPolicy {
    pub fn new(context: impl Into<String>, max_attempts: u32, window_minutes: u64) -> Self {
        Self {
            context: context.into(),
            max_attempts,
            window_minutes,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_minutes * 60
    }
}

/// Per-identity fixed-window limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn key(&self, identity: &str) -> String {
        keys::rate_limit_key(&self.policy.context, identity)
    }

    /// Current count in this window (0 when absent or unreadable).
    pub async fn attempts(&self, identity: &str) -> Result<u32> {
        let key = self.key(identity);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(0);
        };
        Ok(raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, "ignoring non-numeric rate-limit counter");
            0
        }))
    }

    /// Refuse when the identity is already at or over the limit. Does not count.
    pub async fn check_limit_or_throw(&self, identity: &str) -> Result<()> {
        if self.attempts(identity).await? < self.policy.max_attempts {
            return Ok(());
        }

        let ttl = self.store.ttl(&self.key(identity)).await?;
        tracing::warn!(context = %self.policy.context, "rate limit reached");
        Err(CacheError::TooManyAttempts {
            context: self.policy.context.clone(),
            retry_after_secs: u64::try_from(ttl).ok(),
        })
    }

    /// Count one failure. The window starts with the first failure.
    pub async fn register_failure(&self, identity: &str) -> Result<u32> {
        let key = self.key(identity);
        let count = self.store.incr(&key).await?;

        // Also re-arm a counter that lost its expiry between INCR and EXPIRE.
        if count == 1 || self.store.ttl(&key).await? == TTL_NO_EXPIRY {
            self.store.expire(&key, self.policy.window_secs()).await?;
        }
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Forget all failures, typically after a successful attempt.
    pub async fn clear_records(&self, identity: &str) -> Result<()> {
        self.store.del(&self.key(identity)).await?;
        Ok(())
    }

    /// Count a request and report whether it is still within the limit.
    pub async fn hit(&self, identity: &str) -> Result<RateLimitResult> {
        let count = i64::from(self.register_failure(identity).await?);

        if count > i64::from(self.policy.max_attempts) {
            Ok(RateLimitResult::Exceeded(count))
        } else {
            Ok(RateLimitResult::Allowed(count))
        }
    }
}

/// Outcome of counting a guess against a single-use secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Still within budget; the guess may be checked.
    Allowed { attempts: u32 },
    /// Budget exhausted; the secret and its counter are gone.
    Burned,
}

/// Per-token attempt counter that destroys the token when exceeded.
#[derive(Clone)]
pub struct AttemptCounter {
    store: Arc<dyn KeyValueStore>,
    context: String,
    max_attempts: u32,
    window_secs: u64,
}

impl AttemptCounter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        context: impl Into<String>,
        max_attempts: u32,
        window_secs: u64,
    ) -> Self {
        Self {
            store,
            context: context.into(),
            max_attempts,
            window_secs,
        }
    }

    fn key(&self, token_id: &str) -> String {
        keys::attempts_key(&self.context, token_id)
    }

    pub async fn increment(&self, token_id: &str) -> Result<u32> {
        let key = self.key(token_id);
        let count = self.store.incr(&key).await?;
        if count == 1 {
            self.store.expire(&key, self.window_secs).await?;
        }
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    pub async fn attempts(&self, token_id: &str) -> Result<u32> {
        Ok(self
            .store
            .get(&self.key(token_id))
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }

    pub async fn reset_attempts(&self, token_id: &str) -> Result<()> {
        self.store.del(&self.key(token_id)).await?;
        Ok(())
    }

    /// Count an attempt regardless of its outcome. Past the limit, delete
    /// `token_keys` together with the counter.
    pub async fn register_attempt(
        &self,
        token_id: &str,
        token_keys: &[String],
    ) -> Result<AttemptOutcome> {
        let attempts = self.increment(token_id).await?;
        if attempts <= self.max_attempts {
            return Ok(AttemptOutcome::Allowed { attempts });
        }

        let mut doomed = token_keys.to_vec();
        doomed.push(self.key(token_id));
        self.store.del_many(&doomed).await?;

        tracing::warn!(
            context = %self.context,
            token_id = %token_id,
            attempts,
            "attempt limit exceeded, token burned"
        );
        Ok(AttemptOutcome::Burned)
    }
}

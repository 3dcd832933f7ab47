use crate::error::Result;
use crate::stores::{RateLimitPolicy, RateLimiter, Stores};

const LOGIN_CONTEXT: &str = "login:failed";
const LOGIN_MAX_FAILURES: u32 = 5;
const LOGIN_WINDOW_MINUTES: u64 = 15;

/// Failed-login throttle keyed by identity (email or IP).
///
/// Call [`LoginThrottle::guard`] before checking credentials, then report the
/// result with [`LoginThrottle::failed`] or [`LoginThrottle::succeeded`].
#[derive(Clone)]
pub struct LoginThrottle {
    limiter: RateLimiter,
}

impl LoginThrottle {
    pub fn new(stores: &Stores) -> Self {
        Self::with_policy(
            stores,
            RateLimitPolicy::new(LOGIN_CONTEXT, LOGIN_MAX_FAILURES, LOGIN_WINDOW_MINUTES),
        )
    }

    pub fn with_policy(stores: &Stores, policy: RateLimitPolicy) -> Self {
        Self {
            limiter: stores.rate_limiter(policy),
        }
    }

    /// Fails with `TooManyAttempts` once the identity is locked out.
    pub async fn guard(&self, identity: &str) -> Result<()> {
        self.limiter.check_limit_or_throw(identity).await
    }

    pub async fn failed(&self, identity: &str) -> Result<u32> {
        self.limiter.register_failure(identity).await
    }

    pub async fn succeeded(&self, identity: &str) -> Result<()> {
        self.limiter.clear_records(identity).await
    }
}

//! Single-use links: password reset and email verification.
//!
//! The token id travels in the link, so the owner is found through the
//! `token-map:{feature}:{token_id}` reverse index rather than a keyspace scan.

use serde_json::Value;

use crate::error::{CacheError, Result};
use crate::keys;
use crate::models::TokenEnvelope;
use crate::stores::{RateLimitPolicy, RateLimiter, Stores, TokenOptions, TokenStore};

#[derive(Clone)]
pub struct OneTimeTokens {
    tokens: TokenStore,
    issue_limit: RateLimiter,
    feature: &'static str,
    ttl_secs: u64,
}

impl OneTimeTokens {
    /// Password reset links: 1 hour, 3 requests per identity per hour.
    pub fn password_reset(stores: &Stores) -> Self {
        Self::new(
            stores,
            keys::RESET_PASSWORD_PREFIX,
            keys::RESET_PASSWORD_TTL_SECS,
            RateLimitPolicy::new("reset-password:request", 3, 60),
        )
    }

    /// Email verification links: 24 hours, 5 requests per identity per hour.
    pub fn email_verification(stores: &Stores) -> Self {
        Self::new(
            stores,
            keys::EMAIL_VERIFICATION_PREFIX,
            keys::EMAIL_VERIFICATION_TTL_SECS,
            RateLimitPolicy::new("email-verification:request", 5, 60),
        )
    }

    pub fn new(
        stores: &Stores,
        feature: &'static str,
        ttl_secs: u64,
        issue_policy: RateLimitPolicy,
    ) -> Self {
        Self {
            tokens: stores.tokens.clone(),
            issue_limit: stores.rate_limiter(issue_policy),
            feature,
            ttl_secs,
        }
    }

    /// Mint a token for `user_id`. `identity` (usually the email) is what the
    /// request limit counts against.
    pub async fn issue(&self, user_id: &str, identity: &str, metadata: Value) -> Result<String> {
        if !self.issue_limit.hit(identity).await?.is_allowed() {
            return Err(CacheError::TooManyAttempts {
                context: self.issue_limit.policy().context.clone(),
                retry_after_secs: None,
            });
        }

        let token_id = TokenStore::generate_token_id();
        let options = TokenOptions::new(self.feature).with_ttl(self.ttl_secs);
        self.tokens
            .store_token_with_metadata(user_id, &token_id, metadata, options)
            .await?;
        self.tokens
            .map_token_owner(self.feature, &token_id, user_id, self.ttl_secs)
            .await?;

        tracing::info!(feature = self.feature, user_id = %user_id, "one-time token issued");
        Ok(token_id)
    }

    /// Redeem a token. Returns the envelope exactly once; unknown, expired and
    /// already-used tokens all read as `None`.
    pub async fn consume(&self, token_id: &str) -> Result<Option<TokenEnvelope>> {
        let Some(user_id) = self.tokens.resolve_token_owner(self.feature, token_id).await? else {
            return Ok(None);
        };

        let envelope = self
            .tokens
            .consume_token(&user_id, token_id, self.feature)
            .await?;
        self.tokens.unmap_token_owner(self.feature, token_id).await?;

        if envelope.is_none() {
            tracing::warn!(feature = self.feature, user_id = %user_id, "one-time token already used or expired");
        }
        Ok(envelope)
    }

    /// Drop every outstanding token for the user, e.g. after a password change.
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64> {
        // The reverse-index entries expire with their tokens and resolve to
        // nothing once the envelope is gone.
        self.tokens.revoke_all_user_tokens(user_id, self.feature).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::KeyValueStore;
    use crate::test_utils::memory_stores;
    use serde_json::json;

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let (backend, stores) = memory_stores();
        let resets = OneTimeTokens::password_reset(&stores);

        let token = resets.issue("u1", "a@example.com", Value::Null).await.unwrap();
        assert_eq!(
            backend
                .ttl(&format!("reset-password:u1:{}", token))
                .await
                .unwrap(),
            3600
        );

        let envelope = resets.consume(&token).await.unwrap().unwrap();
        assert_eq!(envelope.user_id, "u1");
        assert!(resets.consume(&token).await.unwrap().is_none());
        assert!(!backend
            .exists(&format!("token-map:reset-password:{}", token))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_token_is_none() {
        let (_, stores) = memory_stores();
        let resets = OneTimeTokens::password_reset(&stores);

        assert!(resets.consume("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verification_carries_metadata() {
        let (backend, stores) = memory_stores();
        let verification = OneTimeTokens::email_verification(&stores);

        let token = verification
            .issue("u1", "a@example.com", json!({ "email": "a@example.com" }))
            .await
            .unwrap();
        assert_eq!(
            backend
                .ttl(&format!("token-map:email-verification:{}", token))
                .await
                .unwrap(),
            86_400
        );

        let envelope = verification.consume(&token).await.unwrap().unwrap();
        assert_eq!(envelope.metadata["email"], "a@example.com");
    }

    #[tokio::test]
    async fn issuing_is_rate_limited_per_identity() {
        let (_, stores) = memory_stores();
        let resets = OneTimeTokens::password_reset(&stores);

        for _ in 0..3 {
            resets.issue("u1", "a@example.com", Value::Null).await.unwrap();
        }
        let err = resets
            .issue("u1", "a@example.com", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());

        resets.issue("u2", "b@example.com", Value::Null).await.unwrap();
    }

    #[tokio::test]
    async fn revoke_all_invalidates_outstanding_links() {
        let (_, stores) = memory_stores();
        let resets = OneTimeTokens::password_reset(&stores);
        let first = resets.issue("u1", "a@example.com", Value::Null).await.unwrap();
        let second = resets.issue("u1", "a@example.com", Value::Null).await.unwrap();

        assert_eq!(resets.revoke_all("u1").await.unwrap(), 2);
        assert!(resets.consume(&first).await.unwrap().is_none());
        assert!(resets.consume(&second).await.unwrap().is_none());
    }
}

//! Refresh tokens: one bounded collection entry per login session.

use std::sync::Arc;

use chrono::Utc;

use super::collection::{CollectionConfig, KeyedCollectionRepository};
use super::kv::KeyValueStore;
use crate::error::Result;
use crate::keys;
use crate::models::RefreshTokenRecord;

fn token_id(record: &RefreshTokenRecord) -> &str {
    &record.token_id
}

fn last_active(record: &RefreshTokenRecord) -> i64 {
    record.last_active().timestamp_millis()
}

#[derive(Clone)]
pub struct RefreshTokenRepository {
    sessions: KeyedCollectionRepository<RefreshTokenRecord>,
}

impl RefreshTokenRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_secs: u64, max_per_user: usize) -> Self {
        let config = CollectionConfig {
            base_prefix: keys::REFRESH_TOKEN_PREFIX.to_string(),
            max_items_per_user: max_per_user,
            ttl_secs,
        };
        Self {
            sessions: KeyedCollectionRepository::new(store, config, token_id, last_active),
        }
    }

    /// Store a new session. The least recently used one is dropped at the cap.
    pub async fn issue(&self, record: &RefreshTokenRecord) -> Result<()> {
        self.sessions.save(&record.user_id, record).await
    }

    pub async fn find(&self, user_id: &str, token_id: &str) -> Result<Option<RefreshTokenRecord>> {
        self.sessions.find_one(user_id, token_id).await
    }

    pub async fn is_valid(&self, user_id: &str, token_id: &str) -> Result<bool> {
        self.sessions.validate(user_id, token_id).await
    }

    /// Replace `old_token_id` with `next`. Returns false, storing nothing, when
    /// the old token is no longer live (already rotated, revoked or expired).
    ///
    /// Concurrent rotations of one token have a single winner: only the caller
    /// whose delete removes the old record stores `next`.
    pub async fn rotate(&self, old_token_id: &str, next: &RefreshTokenRecord) -> Result<bool> {
        if !self.sessions.take(&next.user_id, old_token_id).await? {
            tracing::warn!(user_id = %next.user_id, "refresh token reuse or expiry on rotate");
            return Ok(false);
        }
        self.sessions.save(&next.user_id, next).await?;
        Ok(true)
    }

    /// Mark a session as used now and restart its TTL.
    pub async fn touch(&self, user_id: &str, token_id: &str) -> Result<bool> {
        let Some(mut record) = self.sessions.find_one(user_id, token_id).await? else {
            return Ok(false);
        };
        record.last_active_at = Some(Utc::now());
        self.sessions.save(user_id, &record).await?;
        Ok(true)
    }

    pub async fn revoke(&self, user_id: &str, token_id: &str) -> Result<bool> {
        self.sessions.delete(user_id, token_id).await
    }

    /// Log out everywhere.
    pub async fn revoke_all(&self, user_id: &str) -> Result<usize> {
        self.sessions.delete_all_for_user(user_id).await
    }

    /// Active sessions, most recently used first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<RefreshTokenRecord>> {
        self.sessions.find_all_by_user(user_id).await
    }
}

//! Single ephemeral tokens with a metadata envelope.

use std::sync::Arc;

use chrono::Utc;
use futures::future;

use super::kv::{JsonStoreExt, KeyValueStore};
use crate::error::Result;
use crate::keys;
use crate::models::TokenEnvelope;

/// Where and for how long a token is stored.
#[derive(Debug, Clone, Copy)]
pub struct TokenOptions<'a> {
    pub prefix: &'a str,
    /// Defaults to [`keys::DEFAULT_TOKEN_TTL_SECS`].
    pub ttl_secs: Option<u64>,
}

impl<'a> TokenOptions<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self {
            prefix,
            ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    fn ttl(&self) -> u64 {
        self.ttl_secs.unwrap_or(keys::DEFAULT_TOKEN_TTL_SECS)
    }
}

#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 256 random bits, hex encoded.
    pub fn generate_token_id() -> String {
        let bytes: [u8; 32] = rand::random();
        hex::encode(bytes)
    }

    pub async fn store_token(
        &self,
        user_id: &str,
        token_id: &str,
        options: TokenOptions<'_>,
    ) -> Result<String> {
        self.store_token_with_metadata(user_id, token_id, serde_json::Value::Null, options)
            .await
    }

    pub async fn store_token_with_metadata(
        &self,
        user_id: &str,
        token_id: &str,
        metadata: serde_json::Value,
        options: TokenOptions<'_>,
    ) -> Result<String> {
        let envelope = TokenEnvelope {
            token_id: token_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            metadata,
        };

        let key = keys::item_key(options.prefix, user_id, token_id);
        self.store.set_json(&key, &envelope, options.ttl()).await?;

        Ok(envelope.token_id)
    }

    pub async fn validate_token(&self, user_id: &str, token_id: &str, prefix: &str) -> Result<bool> {
        self.store
            .exists(&keys::item_key(prefix, user_id, token_id))
            .await
    }

    /// Read the envelope. Missing, corrupt, or mismatched envelopes read as `None`.
    pub async fn get_token_data(
        &self,
        user_id: &str,
        token_id: &str,
        prefix: &str,
    ) -> Result<Option<TokenEnvelope>> {
        let key = keys::item_key(prefix, user_id, token_id);
        let Some(envelope) = self.store.get_json::<TokenEnvelope>(&key).await? else {
            return Ok(None);
        };

        if envelope.user_id != user_id || envelope.token_id != token_id {
            tracing::warn!(key = %key, "token envelope does not match its key");
            return Ok(None);
        }
        Ok(Some(envelope))
    }

    /// Read and delete in one step. Of several concurrent callers only the one
    /// whose delete removes the key gets the envelope.
    pub async fn consume_token(
        &self,
        user_id: &str,
        token_id: &str,
        prefix: &str,
    ) -> Result<Option<TokenEnvelope>> {
        let Some(envelope) = self.get_token_data(user_id, token_id, prefix).await? else {
            return Ok(None);
        };

        if self.revoke_token(user_id, token_id, prefix).await? {
            Ok(Some(envelope))
        } else {
            Ok(None)
        }
    }

    pub async fn revoke_token(&self, user_id: &str, token_id: &str, prefix: &str) -> Result<bool> {
        self.store
            .del(&keys::item_key(prefix, user_id, token_id))
            .await
    }

    /// Delete every `{prefix}:{user_id}:*` key.
    ///
    /// This scans the whole keyspace. Features that revoke at volume should
    /// keep a reverse index instead (see [`TokenStore::map_token_owner`]).
    pub async fn revoke_all_user_tokens(&self, user_id: &str, prefix: &str) -> Result<u64> {
        let matched = self.scan_user_keys(user_id, prefix).await?;
        let revoked = self.store.del_many(&matched).await?;

        tracing::info!(prefix = %prefix, user_id = %user_id, revoked, "revoked user tokens");
        Ok(revoked)
    }

    pub async fn refresh_token_ttl(
        &self,
        user_id: &str,
        token_id: &str,
        prefix: &str,
        ttl_secs: u64,
    ) -> Result<bool> {
        self.store
            .expire(&keys::item_key(prefix, user_id, token_id), ttl_secs)
            .await
    }

    /// Remaining seconds, or the store's negative codes for no-expiry/missing.
    pub async fn get_token_ttl(&self, user_id: &str, token_id: &str, prefix: &str) -> Result<i64> {
        self.store
            .ttl(&keys::item_key(prefix, user_id, token_id))
            .await
    }

    /// Live envelopes for a user, newest first. Same scan caveat as
    /// [`TokenStore::revoke_all_user_tokens`].
    pub async fn list_user_tokens(&self, user_id: &str, prefix: &str) -> Result<Vec<TokenEnvelope>> {
        let matched = self.scan_user_keys(user_id, prefix).await?;
        let fetched = future::try_join_all(
            matched
                .iter()
                .map(|key| self.store.get_json::<TokenEnvelope>(key)),
        )
        .await?;

        let mut tokens: Vec<TokenEnvelope> = fetched
            .into_iter()
            .flatten()
            .filter(|envelope| envelope.user_id == user_id)
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    /// Keys under `{prefix}:{user_id}:`, rechecked literally after the scan.
    async fn scan_user_keys(&self, user_id: &str, prefix: &str) -> Result<Vec<String>> {
        let owned = keys::user_key_prefix(prefix, user_id);
        let mut matched = self
            .store
            .scan_keys(&keys::user_pattern(prefix, user_id))
            .await?;
        matched.retain(|key| key.starts_with(&owned));
        Ok(matched)
    }

    pub async fn store_simple(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.store.set_ex(key, value, ttl_secs).await
    }

    pub async fn get_simple(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key).await
    }

    pub async fn delete_simple(&self, key: &str) -> Result<bool> {
        self.store.del(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }

    /// Record `token-map:{feature}:{token_id} -> user_id` so the owner can be
    /// found without a scan.
    pub async fn map_token_owner(
        &self,
        feature: &str,
        token_id: &str,
        user_id: &str,
        ttl_secs: u64,
    ) -> Result<()> {
        self.store_simple(&keys::token_map_key(feature, token_id), user_id, ttl_secs)
            .await
    }

    pub async fn resolve_token_owner(&self, feature: &str, token_id: &str) -> Result<Option<String>> {
        self.get_simple(&keys::token_map_key(feature, token_id)).await
    }

    pub async fn unmap_token_owner(&self, feature: &str, token_id: &str) -> Result<bool> {
        self.delete_simple(&keys::token_map_key(feature, token_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryKeyValueStore, MockKeyValueStore};
    use serde_json::json;

    fn setup() -> (Arc<MemoryKeyValueStore>, TokenStore) {
        let store = Arc::new(MemoryKeyValueStore::new());
        (store.clone(), TokenStore::new(store))
    }

    #[test]
    fn generated_ids_are_unique_hex() {
        let a = TokenStore::generate_token_id();
        let b = TokenStore::generate_token_id();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn store_uses_default_ttl() {
        let (store, tokens) = setup();

        tokens
            .store_token("u1", "t1", TokenOptions::new("reset-password"))
            .await
            .unwrap();

        assert_eq!(store.ttl("reset-password:u1:t1").await.unwrap(), 900);
        assert!(tokens.validate_token("u1", "t1", "reset-password").await.unwrap());
    }

    #[tokio::test]
    async fn metadata_round_trips_in_envelope() {
        let (_, tokens) = setup();

        tokens
            .store_token_with_metadata(
                "u1",
                "t1",
                json!({ "email": "a@example.com" }),
                TokenOptions::new("email-verification").with_ttl(86_400),
            )
            .await
            .unwrap();

        let envelope = tokens
            .get_token_data("u1", "t1", "email-verification")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.token_id, "t1");
        assert_eq!(envelope.user_id, "u1");
        assert_eq!(envelope.metadata["email"], "a@example.com");
    }

    #[tokio::test]
    async fn envelope_uses_camel_case_fields() {
        let (store, tokens) = setup();
        tokens
            .store_token("u1", "t1", TokenOptions::new("p"))
            .await
            .unwrap();

        let raw = store.get("p:u1:t1").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["tokenId"], "t1");
        assert_eq!(value["userId"], "u1");
        assert!(value["createdAt"].is_string());
    }

    #[tokio::test]
    async fn malformed_envelope_reads_as_none() {
        let (store, tokens) = setup();
        store.put_raw("p:u1:t1", r#"{"unexpected":true}"#);
        store.put_raw("p:u1:t2", "not-json");

        assert!(tokens.get_token_data("u1", "t1", "p").await.unwrap().is_none());
        assert!(tokens.get_token_data("u1", "t2", "p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn envelope_for_other_user_reads_as_none() {
        let (store, tokens) = setup();
        tokens
            .store_token("u2", "t1", TokenOptions::new("p"))
            .await
            .unwrap();
        let raw = store.get("p:u2:t1").await.unwrap().unwrap();
        store.put_raw("p:u1:t1", &raw);

        assert!(tokens.get_token_data("u1", "t1", "p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let (_, tokens) = setup();
        tokens
            .store_token("u1", "t1", TokenOptions::new("p"))
            .await
            .unwrap();

        assert!(tokens.get_token_data("u1", "t1", "p").await.unwrap().is_some());
        assert!(tokens.revoke_token("u1", "t1", "p").await.unwrap());
        assert!(tokens.get_token_data("u1", "t1", "p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn consume_returns_envelope_once() {
        let (_, tokens) = setup();
        tokens
            .store_token("u1", "t1", TokenOptions::new("p"))
            .await
            .unwrap();

        assert!(tokens.consume_token("u1", "t1", "p").await.unwrap().is_some());
        assert!(tokens.consume_token("u1", "t1", "p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_all_is_scoped_to_user_and_prefix() {
        let (store, tokens) = setup();
        for (prefix, user, token) in [
            ("p", "u1", "a"),
            ("p", "u1", "b"),
            ("p", "u10", "c"),
            ("p", "u2", "d"),
            ("other", "u1", "e"),
        ] {
            tokens
                .store_token(user, token, TokenOptions::new(prefix))
                .await
                .unwrap();
        }

        assert_eq!(tokens.revoke_all_user_tokens("u1", "p").await.unwrap(), 2);
        assert_eq!(
            store.keys(),
            vec![
                "other:u1:e".to_string(),
                "p:u10:c".to_string(),
                "p:u2:d".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn revoke_all_treats_glob_characters_literally() {
        let (store, tokens) = setup();
        for (user, token) in [("u1", "a"), ("u?", "b"), ("u*", "c"), ("u[1]", "d")] {
            tokens
                .store_token(user, token, TokenOptions::new("p"))
                .await
                .unwrap();
        }

        assert_eq!(tokens.revoke_all_user_tokens("u?", "p").await.unwrap(), 1);
        assert_eq!(tokens.revoke_all_user_tokens("u*", "p").await.unwrap(), 1);
        assert_eq!(store.keys(), vec!["p:u1:a".to_string(), "p:u[1]:d".to_string()]);

        let listed = tokens.list_user_tokens("u[1]", "p").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|t| t.token_id.as_str()).collect();
        assert_eq!(ids, vec!["d"]);
    }

    #[tokio::test]
    async fn scanned_keys_outside_user_prefix_are_ignored() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_scan_keys()
            .returning(|_| Ok(vec!["p:u1:a".to_string(), "p:u2:b".to_string()]));
        store
            .expect_del_many()
            .withf(|keys: &[String]| keys.len() == 1 && keys[0] == "p:u1:a")
            .times(1)
            .returning(|keys| Ok(keys.len() as u64));
        let tokens = TokenStore::new(Arc::new(store));

        assert_eq!(tokens.revoke_all_user_tokens("u1", "p").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let (_, tokens) = setup();
        tokens
            .store_token("u1", "first", TokenOptions::new("p"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        tokens
            .store_token("u1", "second", TokenOptions::new("p"))
            .await
            .unwrap();

        let listed = tokens.list_user_tokens("u1", "p").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|t| t.token_id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn ttl_can_be_refreshed() {
        let (_, tokens) = setup();
        tokens
            .store_token("u1", "t1", TokenOptions::new("p").with_ttl(30))
            .await
            .unwrap();

        assert!(tokens.refresh_token_ttl("u1", "t1", "p", 300).await.unwrap());
        assert_eq!(tokens.get_token_ttl("u1", "t1", "p").await.unwrap(), 300);
        assert!(!tokens.refresh_token_ttl("u1", "gone", "p", 300).await.unwrap());
        assert_eq!(tokens.get_token_ttl("u1", "gone", "p").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn simple_values_and_owner_map() {
        let (_, tokens) = setup();

        tokens.store_simple("blacklist:jti-1", "1", 60).await.unwrap();
        assert!(tokens.exists("blacklist:jti-1").await.unwrap());
        assert!(tokens.delete_simple("blacklist:jti-1").await.unwrap());
        assert!(!tokens.exists("blacklist:jti-1").await.unwrap());

        tokens
            .map_token_owner("email-verification", "t1", "u1", 60)
            .await
            .unwrap();
        assert_eq!(
            tokens
                .resolve_token_owner("email-verification", "t1")
                .await
                .unwrap()
                .as_deref(),
            Some("u1")
        );
        assert!(tokens.unmap_token_owner("email-verification", "t1").await.unwrap());
        assert!(tokens
            .resolve_token_owner("email-verification", "t1")
            .await
            .unwrap()
            .is_none());
    }
}

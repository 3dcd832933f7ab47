//! Bounded per-user collections behind a secondary index.
//!
//! Each item lives under `{prefix}:{user_id}:{item_id}` and its id is tracked in
//! the set `{prefix}:user-sets:{user_id}`. The index may briefly hold ids whose
//! data already expired or no longer decodes ("ghosts"); reads that notice them
//! prune the index, so no background sweeper is needed.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future;
use serde::{Serialize, de::DeserializeOwned};

use super::kv::{JsonStoreExt, KeyValueStore};
use crate::error::Result;
use crate::keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub base_prefix: String,
    /// Soft cap on live items per user.
    pub max_items_per_user: usize,
    pub ttl_secs: u64,
}

/// Extracts the item id from a stored item.
pub type ItemIdFn<T> = fn(&T) -> &str;
/// Extracts the recency key used for ordering and eviction (higher = newer).
pub type LastActiveFn<T> = fn(&T) -> i64;

pub struct KeyedCollectionRepository<T> {
    store: Arc<dyn KeyValueStore>,
    config: CollectionConfig,
    item_id: ItemIdFn<T>,
    last_active: LastActiveFn<T>,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for KeyedCollectionRepository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            item_id: self.item_id,
            last_active: self.last_active,
            _item: PhantomData,
        }
    }
}

impl<T> KeyedCollectionRepository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: CollectionConfig,
        item_id: ItemIdFn<T>,
        last_active: LastActiveFn<T>,
    ) -> Self {
        Self {
            store,
            config,
            item_id,
            last_active,
            _item: PhantomData,
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    fn item_key(&self, user_id: &str, item_id: &str) -> String {
        keys::item_key(&self.config.base_prefix, user_id, item_id)
    }

    fn index_key(&self, user_id: &str) -> String {
        keys::index_key(&self.config.base_prefix, user_id)
    }

    /// Insert or replace an item, evicting the least recently active one when
    /// a new id would push the user past the cap.
    pub async fn save(&self, user_id: &str, item: &T) -> Result<()> {
        let item_id = (self.item_id)(item);
        let index_key = self.index_key(user_id);

        let current_ids = self.store.smembers(&index_key).await?;
        let is_new = !current_ids.iter().any(|id| id == item_id);

        if is_new && current_ids.len() >= self.config.max_items_per_user {
            self.make_room(user_id).await?;
        }

        self.store
            .set_json(&self.item_key(user_id, item_id), item, self.config.ttl_secs)
            .await?;
        self.store.sadd(&index_key, &[item_id.to_string()]).await?;
        // The index must outlive every item it tracks.
        self.store.expire(&index_key, self.config.ttl_secs).await?;

        Ok(())
    }

    /// Evict the oldest live items so one more fits under the cap.
    async fn make_room(&self, user_id: &str) -> Result<()> {
        let live = self.find_all_by_user(user_id).await?;
        let limit = self.config.max_items_per_user;
        if live.len() < limit {
            // Ghost cleanup already freed a slot.
            return Ok(());
        }

        // `live` is newest first, so the overflow sits at the tail.
        let overflow = live.len() + 1 - limit;
        for item in live.iter().rev().take(overflow) {
            let evicted_id = (self.item_id)(item);
            self.delete(user_id, evicted_id).await?;
            tracing::info!(
                prefix = %self.config.base_prefix,
                user_id = %user_id,
                item_id = %evicted_id,
                "evicted least recently active item"
            );
        }
        Ok(())
    }

    /// Delete one item (returns true if the data or its index entry existed).
    pub async fn delete(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let item_key = self.item_key(user_id, item_id);
        let index_key = self.index_key(user_id);
        let members = [item_id.to_string()];

        let (deleted, removed) = futures::try_join!(
            self.store.del(&item_key),
            self.store.srem(&index_key, &members),
        )?;
        Ok(deleted || removed > 0)
    }

    /// Delete one item, answering true only to the caller whose `DEL` removed
    /// the data. Of several concurrent callers for the same id at most one
    /// wins; a ghost id is unindexed but reads as false.
    pub async fn take(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let taken = self.store.del(&self.item_key(user_id, item_id)).await?;
        self.store
            .srem(&self.index_key(user_id), &[item_id.to_string()])
            .await?;
        Ok(taken)
    }

    /// Delete every tracked item and the index. Returns the number of ids that
    /// were tracked, ghosts included.
    pub async fn delete_all_for_user(&self, user_id: &str) -> Result<usize> {
        let index_key = self.index_key(user_id);
        let ids = self.store.smembers(&index_key).await?;

        let mut doomed: Vec<String> = ids.iter().map(|id| self.item_key(user_id, id)).collect();
        doomed.push(index_key);
        self.store.del_many(&doomed).await?;

        Ok(ids.len())
    }

    /// Point lookup; skips the data read when the index does not know the id.
    pub async fn find_one(&self, user_id: &str, item_id: &str) -> Result<Option<T>> {
        if !self.store.sismember(&self.index_key(user_id), item_id).await? {
            return Ok(None);
        }
        self.store.get_json(&self.item_key(user_id, item_id)).await
    }

    /// All live items, most recently active first. Prunes ghost ids.
    pub async fn find_all_by_user(&self, user_id: &str) -> Result<Vec<T>> {
        let index_key = self.index_key(user_id);
        let ids = self.store.smembers(&index_key).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.item_key(user_id, id)).collect();
        let fetched =
            future::try_join_all(keys.iter().map(|key| self.store.get_json::<T>(key))).await?;

        let mut items = Vec::with_capacity(ids.len());
        let mut ghosts = Vec::new();
        let mut ghost_keys = Vec::new();
        for ((id, key), item) in ids.into_iter().zip(keys).zip(fetched) {
            match item {
                Some(item) => items.push(item),
                None => {
                    ghosts.push(id);
                    ghost_keys.push(key);
                }
            }
        }

        if !ghosts.is_empty() {
            // Undecodable data is dropped with its index entry so nothing is
            // left unreachable until its TTL runs out.
            let (pruned, _) = futures::try_join!(
                self.store.srem(&index_key, &ghosts),
                self.store.del_many(&ghost_keys),
            )?;
            tracing::debug!(
                prefix = %self.config.base_prefix,
                user_id = %user_id,
                pruned,
                "pruned ghost index members"
            );
        }

        items.sort_by_key(|item| std::cmp::Reverse((self.last_active)(item)));
        Ok(items)
    }

    /// Authoritative existence check: the id must be indexed and its data must
    /// still exist. A ghost is pruned before answering false.
    pub async fn validate(&self, user_id: &str, item_id: &str) -> Result<bool> {
        let index_key = self.index_key(user_id);
        if !self.store.sismember(&index_key, item_id).await? {
            return Ok(false);
        }
        if self.store.exists(&self.item_key(user_id, item_id)).await? {
            return Ok(true);
        }

        self.store.srem(&index_key, &[item_id.to_string()]).await?;
        tracing::debug!(
            prefix = %self.config.base_prefix,
            user_id = %user_id,
            item_id = %item_id,
            "pruned ghost index member"
        );
        Ok(false)
    }
}

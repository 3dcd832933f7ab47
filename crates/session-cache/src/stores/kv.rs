//! Primitive TTL key-value/set operations and the Redis backend.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CacheError, Result};

/// `ttl` reply for a key that exists without an expiry.
pub const TTL_NO_EXPIRY: i64 = -1;
/// `ttl` reply for a key that does not exist.
pub const TTL_MISSING: i64 = -2;

/// Single-key primitives of the backing store.
///
/// Each call is one atomic round-trip; nothing here spans multiple keys.
/// Transport failures and timeouts surface as [`CacheError::StoreUnavailable`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Health check - verify store connectivity.
    async fn health_check(&self) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value that expires after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()>;

    /// Remove members from a set, returning how many were present.
    async fn srem(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a key (returns true if it existed).
    async fn del(&self, key: &str) -> Result<bool>;

    /// Delete several keys, returning how many existed.
    async fn del_many(&self, keys: &[String]) -> Result<u64>;

    /// Set a key's expiry (returns false if the key does not exist).
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Remaining lifetime in seconds, [`TTL_NO_EXPIRY`] or [`TTL_MISSING`].
    async fn ttl(&self, key: &str) -> Result<i64>;

    /// Atomically increment a counter, creating it at 1 without an expiry.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// All keys matching a glob pattern. Walks the whole keyspace.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// JSON helpers available on every [`KeyValueStore`].
#[async_trait]
pub trait JsonStoreExt {
    /// Serialize `value` and store it with a TTL.
    async fn set_json<T>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()>
    where
        T: Serialize + Sync + ?Sized;

    /// Read and decode a JSON value. Corrupt payloads are logged and read as absent.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send;
}

#[async_trait]
impl<S> JsonStoreExt for S
where
    S: KeyValueStore + ?Sized,
{
    async fn set_json<T>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let json = serde_json::to_string(value)?;
        self.set_ex(key, &json, ttl_secs).await
    }

    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let Some(json) = self.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "discarding malformed cache payload");
                Ok(None)
            }
        }
    }
}

/// Redis implementation of KeyValueStore.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    client: redis::Client,
    timeout: Duration,
}

impl RedisKeyValueStore {
    pub fn new(client: redis::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Run one command under the configured timeout.
    async fn run<T, F>(&self, operation: &'static str, command: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::error!(operation, error = %err, "redis command failed");
                Err(CacheError::unavailable(operation, err))
            }
            Err(elapsed) => {
                tracing::error!(operation, timeout_ms = self.timeout_ms(), "redis command timed out");
                Err(CacheError::unavailable(operation, elapsed))
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    async fn connection(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn health_check(&self) -> Result<bool> {
        self.run("PING", async {
            let mut conn = self.connection().await?;
            let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(reply == "PONG")
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run("GET", async {
            let mut conn = self.connection().await?;
            conn.get(key).await
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.run("SET", async {
            let mut conn = self.connection().await?;
            conn.set_ex(key, value, ttl_secs).await
        })
        .await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.run("SADD", async {
            let mut conn = self.connection().await?;
            let _: i64 = conn.sadd(key, members).await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.run("SREM", async {
            let mut conn = self.connection().await?;
            conn.srem(key, members).await
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.run("SMEMBERS", async {
            let mut conn = self.connection().await?;
            conn.smembers(key).await
        })
        .await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.run("SISMEMBER", async {
            let mut conn = self.connection().await?;
            conn.sismember(key, member).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run("EXISTS", async {
            let mut conn = self.connection().await?;
            conn.exists(key).await
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.run("DEL", async {
            let mut conn = self.connection().await?;
            let deleted: i64 = conn.del(key).await?;
            Ok::<_, redis::RedisError>(deleted > 0)
        })
        .await
    }

    async fn del_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run("DEL", async {
            let mut conn = self.connection().await?;
            conn.del(keys).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.run("EXPIRE", async {
            let mut conn = self.connection().await?;
            conn.expire(key, ttl_secs as i64).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.run("TTL", async {
            let mut conn = self.connection().await?;
            conn.ttl(key).await
        })
        .await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.run("INCR", async {
            let mut conn = self.connection().await?;
            redis::cmd("INCR").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.run("SCAN", async {
            let mut conn = self.connection().await?;
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            // SCAN may return a key more than once across iterations.
            keys.sort();
            keys.dedup();
            Ok::<_, redis::RedisError>(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryKeyValueStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn json_round_trip_through_store() {
        let store = MemoryKeyValueStore::new();
        let payload = Payload {
            name: "laptop".to_string(),
            count: 2,
        };

        store.set_json("k", &payload, 60).await.unwrap();

        let read: Option<Payload> = store.get_json("k").await.unwrap();
        assert_eq!(read, Some(payload));
    }

    #[tokio::test]
    async fn get_json_missing_key_is_none() {
        let store = MemoryKeyValueStore::new();

        let read: Option<Payload> = store.get_json("absent").await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn get_json_malformed_payload_is_none() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("k", "{not json", 60).await.unwrap();

        let read: Option<Payload> = store.get_json("k").await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn get_json_propagates_store_failure() {
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| {
            Err(CacheError::unavailable(
                "GET",
                std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"),
            ))
        });

        let err = store.get_json::<Payload>("k").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn timeout_ms_saturates() {
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();

        let store = RedisKeyValueStore::new(client.clone(), Duration::from_millis(2_000));
        assert_eq!(store.timeout_ms(), 2_000);

        let store = RedisKeyValueStore::new(client, Duration::MAX);
        assert_eq!(store.timeout_ms(), u64::MAX);
    }

    #[tokio::test]
    async fn unreachable_redis_is_unavailable() {
        // Nothing listens on port 1; the connect attempt fails fast.
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let store = RedisKeyValueStore::new(client, Duration::from_millis(500));

        let err = store.get("k").await.unwrap_err();
        assert!(err.is_unavailable());
    }
}

//! In-process store with lazy TTL expiry.
//!
//! Implements the same single-key semantics as Redis so the repositories can be
//! exercised without a server. Expired keys are dropped when touched.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::kv::{KeyValueStore, TTL_MISSING, TTL_NO_EXPIRY};
use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a key as if its TTL had just run out.
    pub fn expire_now(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Store a raw string without any TTL.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut entries = self.lock();
        purge_expired(&mut entries);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panicking test thread must not wedge the other tests.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock and evict `key` if it has expired.
    fn live(&self, key: &str) -> MutexGuard<'_, HashMap<String, Entry>> {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
            entries.remove(key);
        }
        entries
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    entries.retain(|_, entry| !entry.is_expired(now));
}

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

fn wrong_type(operation: &'static str) -> CacheError {
    CacheError::unavailable(operation, WRONG_TYPE)
}

/// Glob match with the SCAN MATCH syntax: `*`, `?`, `[...]` classes (with `^`
/// negation and `a-z` ranges) and `\` escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_from(&p, &t)
}

fn match_from(p: &[char], t: &[char]) -> bool {
    match p.split_first() {
        None => t.is_empty(),
        Some(('*', rest)) => (0..=t.len()).any(|skip| match_from(rest, &t[skip..])),
        Some(_) if t.is_empty() => false,
        Some(('?', rest)) => match_from(rest, &t[1..]),
        Some(('[', rest)) => {
            let (matched, after) = match_class(rest, t[0]);
            matched && match_from(after, &t[1..])
        }
        Some(('\\', rest)) if !rest.is_empty() => rest[0] == t[0] && match_from(&rest[1..], &t[1..]),
        Some((&c, rest)) => c == t[0] && match_from(rest, &t[1..]),
    }
}

/// Test `c` against the class body following `[`. Returns the verdict and
/// the pattern after the closing `]`.
fn match_class(p: &[char], c: char) -> (bool, &[char]) {
    let (negate, mut i) = match p.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;
    while i < p.len() && p[i] != ']' {
        if p[i] == '\\' && i + 1 < p.len() {
            i += 1;
            matched |= p[i] == c;
        } else if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let (lo, hi) = if p[i] <= p[i + 2] { (p[i], p[i + 2]) } else { (p[i + 2], p[i]) };
            matched |= (lo..=hi).contains(&c);
            i += 2;
        } else {
            matched |= p[i] == c;
        }
        i += 1;
    }
    // An unterminated class runs to the end of the pattern.
    let after = if i < p.len() { &p[i + 1..] } else { &p[i..] };
    (matched != negate, after)
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.live(key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type("GET")),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut entries = self.live(key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            Value::Str(_) => Err(wrong_type("SADD")),
        }
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        let mut entries = self.live(key);
        let set = match entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set,
            Some(_) => return Err(wrong_type("SREM")),
            None => return Ok(0),
        };

        let removed = members.iter().filter(|m| set.remove(m.as_str())).count() as u64;
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let entries = self.live(key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type("SMEMBERS")),
            None => Ok(Vec::new()),
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let entries = self.live(key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type("SISMEMBER")),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).contains_key(key))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).remove(key).is_some())
    }

    async fn del_many(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.lock();
        purge_expired(&mut entries);
        Ok(keys.iter().filter(|k| entries.remove(k.as_str()).is_some()).count() as u64)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut entries = self.live(key);
        Ok(match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                true
            }
            None => false,
        })
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let entries = self.live(key);
        Ok(match entries.get(key) {
            None => TTL_MISSING,
            Some(Entry {
                expires_at: None, ..
            }) => TTL_NO_EXPIRY,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                // Redis rounds to the nearest second.
                remaining.as_secs_f64().round() as i64
            }
        })
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.live(key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str("0".to_string()),
            expires_at: None,
        });
        let next = match &entry.value {
            Value::Str(current) => current
                .parse::<i64>()
                .map_err(|_| CacheError::unavailable("INCR", "value is not an integer"))?
                + 1,
            Value::Set(_) => return Err(wrong_type("INCR")),
        };
        entry.value = Value::Str(next.to_string());
        Ok(next)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_like_redis() {
        assert!(glob_match("reset-password:u1:*", "reset-password:u1:abc"));
        assert!(!glob_match("reset-password:u1:*", "reset-password:u10:abc"));
        assert!(!glob_match("reset-password:u1:*", "2fa:u1:abc"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("a*b", "a"));
    }

    #[test]
    fn glob_supports_classes_and_escapes() {
        assert!(glob_match("u[12]", "u1"));
        assert!(!glob_match("u[12]", "u3"));
        assert!(glob_match("u[a-c]", "ub"));
        assert!(glob_match("u[^a-c]", "ud"));
        assert!(!glob_match("u[^a-c]", "ua"));

        assert!(glob_match(r"p:u\?:*", "p:u?:b"));
        assert!(!glob_match(r"p:u\?:*", "p:u1:a"));
        assert!(glob_match(r"p:u\*:*", "p:u*:c"));
        assert!(!glob_match(r"p:u\*:*", "p:u10:c"));
        assert!(glob_match(r"p:u\[1\]:*", "p:u[1]:d"));
        assert!(!glob_match(r"p:u\[1\]:*", "p:u1:a"));
        assert!(glob_match(r"a\\b", r"a\b"));
    }

    #[tokio::test]
    async fn type_mismatch_is_an_error() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("s", "v", 60).await.unwrap();
        store.sadd("set", &["a".to_string()]).await.unwrap();

        assert!(store.sadd("s", &["a".to_string()]).await.unwrap_err().is_unavailable());
        assert!(store.smembers("s").await.is_err());
        assert!(store.srem("s", &["a".to_string()]).await.is_err());
        assert!(store.sismember("s", "a").await.is_err());
        assert!(store.get("set").await.is_err());
        assert!(store.incr("set").await.is_err());
        assert!(store.incr("s").await.is_err());

        // The original values are untouched.
        assert_eq!(store.get("s").await.unwrap().as_deref(), Some("v"));
        assert!(store.sismember("set", "a").await.unwrap());
    }

    #[tokio::test]
    async fn keys_expire_after_ttl() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("k", "v", 0).await.unwrap();

        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), TTL_MISSING);
    }

    #[tokio::test]
    async fn ttl_reports_remaining_and_no_expiry() {
        let store = MemoryKeyValueStore::new();
        store.set_ex("a", "v", 60).await.unwrap();
        store.put_raw("b", "v");

        assert_eq!(store.ttl("a").await.unwrap(), 60);
        assert_eq!(store.ttl("b").await.unwrap(), TTL_NO_EXPIRY);
    }

    #[tokio::test]
    async fn set_operations() {
        let store = MemoryKeyValueStore::new();
        let members = vec!["a".to_string(), "b".to_string()];
        store.sadd("s", &members).await.unwrap();

        assert!(store.sismember("s", "a").await.unwrap());
        assert_eq!(store.srem("s", &["a".to_string(), "z".to_string()]).await.unwrap(), 1);
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b".to_string()]);

        store.srem("s", &["b".to_string()]).await.unwrap();
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn incr_creates_counter_without_expiry() {
        let store = MemoryKeyValueStore::new();

        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.ttl("c").await.unwrap(), TTL_NO_EXPIRY);
    }

    #[tokio::test]
    async fn expire_on_missing_key_is_false() {
        let store = MemoryKeyValueStore::new();

        assert!(!store.expire("missing", 10).await.unwrap());
    }
}

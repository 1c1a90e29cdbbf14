//! TTL key-value cache
//!
//! Backs the request-level idempotency cache and the login rate limiter:
//! Redis in deployments, an in-memory clone of the same contract for tests
//! and dev fallback. Like the ledger and the repositories, the backend is
//! a closed variant selected at startup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::Instant;

/// Cache error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Cache backend selected at startup.
#[derive(Clone)]
pub enum Cache {
    Redis(RedisCache),
    Memory(MemoryCache),
}

impl Cache {
    /// Fetch a value.
    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            Cache::Redis(c) => c.get(key).await,
            Cache::Memory(c) => Ok(c.get(key)),
        }
    }

    /// Store a value only if the key is absent (`SET NX EX`). Returns
    /// whether the reservation was applied.
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        match self {
            Cache::Redis(c) => c.set_nx(key, value, ttl).await,
            Cache::Memory(c) => Ok(c.set_nx(key, value, ttl)),
        }
    }

    /// Store a value with a TTL, overwriting any prior one.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        match self {
            Cache::Redis(c) => c.set(key, value, ttl).await,
            Cache::Memory(c) => {
                c.set(key, value, ttl);
                Ok(())
            }
        }
    }

    /// Delete a key.
    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Cache::Redis(c) => c.del(key).await,
            Cache::Memory(c) => {
                c.del(key);
                Ok(())
            }
        }
    }

    /// Increment a counter, creating it at 1 with no expiry.
    pub async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        match self {
            Cache::Redis(c) => c.incr(key).await,
            Cache::Memory(c) => Ok(c.incr(key)),
        }
    }

    /// Set the expiry of an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        match self {
            Cache::Redis(c) => c.expire(key, ttl).await,
            Cache::Memory(c) => {
                c.expire(key, ttl);
                Ok(())
            }
        }
    }

    /// Connectivity check.
    pub async fn ping(&self) -> Result<(), CacheError> {
        match self {
            Cache::Redis(c) => c.ping().await,
            Cache::Memory(_) => Ok(()),
        }
    }
}

/// Cache backed by Redis.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1i64).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, i64>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

fn is_expired(entry: &Entry, now: Instant) -> bool {
    entry.expires_at.is_some_and(|at| now >= at)
}

/// In-memory cache with the same TTL semantics, for tests and dev
/// fallback. Expired entries are dropped lazily on access.
#[derive(Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(state: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if state.get(key).is_some_and(|e| is_expired(e, now)) {
            state.remove(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut state = self.lock();
        Self::prune(&mut state, key, now);
        state.get(key).map(|e| e.value.clone())
    }

    pub fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        Self::prune(&mut state, key, now);
        if state.contains_key(key) {
            return false;
        }
        state.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Some(now + ttl) },
        );
        true
    }

    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        state.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Some(now + ttl) },
        );
    }

    pub fn del(&self, key: &str) {
        let mut state = self.lock();
        state.remove(key);
    }

    /// Counters are created without an expiry; callers set one explicitly,
    /// matching Redis `INCR` + `EXPIRE`.
    pub fn incr(&self, key: &str) -> i64 {
        let now = Instant::now();
        let mut state = self.lock();
        Self::prune(&mut state, key, now);
        let entry = state.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        let count = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        count
    }

    pub fn expire(&self, key: &str, ttl: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        if let Some(entry) = state.get_mut(key) {
            entry.expires_at = Some(now + ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_reserves_once() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("k", "first", Duration::from_secs(60)));
        assert!(!cache.set_nx("k", "second", Duration::from_secs(60)));
        assert_eq!(cache.get("k"), Some("first".to_string()));

        cache.del("k");
        assert!(cache.set_nx("k", "third", Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k"), None);
        // The slot is reusable once expired.
        assert!(cache.set_nx("k", "v2", Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_and_expire_window() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("count"), 1);
        cache.expire("count", Duration::from_secs(60));
        assert_eq!(cache.incr("count"), 2);
        assert_eq!(cache.incr("count"), 3);

        // The window elapses and the counter restarts.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.incr("count"), 1);
    }

    #[tokio::test]
    async fn test_enum_dispatch_memory() {
        let cache = Cache::Memory(MemoryCache::new());
        assert!(cache.set_nx("k", "v", Duration::from_secs(60)).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        cache.del("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.ping().await.unwrap();
    }
}

//! Shared expiring KV index for the ret2frp controller
//!
//! Every piece of controller state lives here: traffic configuration and
//! address records with TTLs, the `working` deprovisioning ledger, remote
//! port reservations, and the master API token. The [`Cache`] wrapper owns
//! the TTL policy (a write with a non-positive TTL is suppressed, an expire
//! with a non-positive TTL deletes) and delegates raw operations to a
//! [`Store`] backend: Redis when an endpoint is configured, an in-process
//! map otherwise.

pub mod key;
mod memory;
mod redis;

pub use self::key::Key;
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Errors surfaced by KV operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("kv transport error: {0}")]
    Transport(#[from] ::redis::RedisError),
}

/// Raw KV backend operations
///
/// Implementations provide plain store semantics; TTL edge-case policy lives
/// in [`Cache`]. `keys` must use a bounded cursor scan, never a
/// stop-the-world enumeration.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), CacheError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Remaining TTL in seconds: -2 if the key is absent, -1 if it has no
    /// expiry (Redis `TTL` semantics)
    async fn ttl(&self, key: &str) -> Result<i64, CacheError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError>;
}

/// Typed handle over the shared KV store
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn Store>,
}

impl Cache {
    /// Wrap an explicit backend
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// In-process backend, used when no KV endpoint is configured and in tests
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Connect to the configured endpoint; an empty url selects the
    /// in-process backend
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        if url.is_empty() {
            tracing::info!("no cache endpoint configured, using in-process store");
            return Ok(Self::memory());
        }
        Ok(Self::new(Arc::new(RedisStore::connect(url).await?)))
    }

    pub async fn get(&self, key: impl AsRef<str>) -> Result<Option<String>, CacheError> {
        self.store.get(key.as_ref()).await
    }

    /// Write a value. A TTL of zero or less means the value is already
    /// expired, so the write is suppressed.
    pub async fn set(
        &self,
        key: impl AsRef<str>,
        value: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<(), CacheError> {
        match ttl_seconds {
            Some(ttl) if ttl <= 0 => {
                trace!(key = key.as_ref(), ttl, "suppressing write of expired value");
                Ok(())
            }
            Some(ttl) => self.store.set(key.as_ref(), value, Some(ttl as u64)).await,
            None => self.store.set(key.as_ref(), value, None).await,
        }
    }

    /// Idempotent delete
    pub async fn del(&self, key: impl AsRef<str>) -> Result<(), CacheError> {
        self.store.del(key.as_ref()).await
    }

    pub async fn exists(&self, key: impl AsRef<str>) -> Result<bool, CacheError> {
        self.store.exists(key.as_ref()).await
    }

    /// Reset a key's TTL. No-op if the key is absent; a TTL of zero or less
    /// deletes the key.
    pub async fn expire(&self, key: impl AsRef<str>, ttl_seconds: i64) -> Result<(), CacheError> {
        if ttl_seconds <= 0 {
            return self.store.del(key.as_ref()).await;
        }
        self.store.expire(key.as_ref(), ttl_seconds as u64).await
    }

    /// Enumerate keys matching a glob pattern with `*` wildcards.
    ///
    /// Backends may treat `*` as crossing `:` (Redis does); callers that
    /// rely on segment structure must re-filter by segment count.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.store.keys(pattern).await
    }

    /// Remaining TTL in seconds (-2 absent, -1 no expiry)
    pub async fn ttl(&self, key: impl AsRef<str>) -> Result<i64, CacheError> {
        self.store.ttl(key.as_ref()).await
    }

    pub async fn hget(
        &self,
        key: impl AsRef<str>,
        field: &str,
    ) -> Result<Option<String>, CacheError> {
        self.store.hget(key.as_ref(), field).await
    }

    pub async fn hset(
        &self,
        key: impl AsRef<str>,
        field: &str,
        value: &str,
    ) -> Result<(), CacheError> {
        self.store.hset(key.as_ref(), field, value).await
    }

    pub async fn hdel(&self, key: impl AsRef<str>, field: &str) -> Result<(), CacheError> {
        self.store.hdel(key.as_ref(), field).await
    }
}

/// Parse a JSON document, treating malformed input as absence
pub fn try_parse_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_with_non_positive_ttl_is_suppressed() {
        let cache = Cache::memory();
        cache.set("k", "v", Some(0)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", "v", Some(-5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", "v", Some(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn expire_with_non_positive_ttl_deletes() {
        let cache = Cache::memory();
        cache.set("k", "v", None).await.unwrap();

        cache.expire("k", 0).await.unwrap();
        assert!(!cache.exists("k").await.unwrap());

        // expiring an absent key stays a no-op
        cache.expire("k", 30).await.unwrap();
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn del_is_idempotent() {
        let cache = Cache::memory();
        cache.del("missing").await.unwrap();
        cache.set("k", "v", None).await.unwrap();
        cache.del("k").await.unwrap();
        cache.del("k").await.unwrap();
        assert!(!cache.exists("k").await.unwrap());
    }

    #[test]
    fn try_parse_json_tolerates_garbage() {
        assert_eq!(try_parse_json::<Vec<u16>>("[1,2,3]"), Some(vec![1, 2, 3]));
        assert_eq!(try_parse_json::<Vec<u16>>("not json"), None);
        assert_eq!(try_parse_json::<Vec<u16>>(""), None);
    }
}

//! Redis-backed KV store
//!
//! Uses a shared [`ConnectionManager`] handle (auto-reconnecting, cheap to
//! clone). Key enumeration uses `SCAN MATCH` so the server is never blocked
//! by a full keyspace walk.

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};

use crate::{CacheError, Store};

/// [`Store`] backed by a Redis endpoint
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to a Redis endpoint url (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(url, "connected to cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_seconds as i64).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut iter: ::redis::AsyncIter<'_, String> = conn.scan_match(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.ttl(key).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }
}

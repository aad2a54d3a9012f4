//! In-process KV backend
//!
//! Used when no cache endpoint is configured, and by tests. Semantics match
//! the Redis backend except that the glob `*` here matches exactly one
//! colon-separated segment (the strict reading), so it is never looser than
//! what callers filter for.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{CacheError, Store};

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => deadline > now,
            None => true,
        }
    }
}

/// HashMap-backed [`Store`] with per-entry deadlines on a monotonic clock
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Match a key against a glob where `*` stands for one whole segment
fn glob_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(':').collect();
    let key: Vec<&str> = key.split(':').collect();
    pattern.len() == key.len()
        && pattern
            .iter()
            .zip(&key)
            .all(|(p, k)| *p == "*" || p == k)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.live(now) => match &entry.value {
                Value::Scalar(s) => Ok(Some(s.clone())),
                Value::Hash(_) => Ok(None),
            },
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.to_string()),
                expires_at: ttl_seconds.map(|t| Instant::now() + Duration::from_secs(t)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.live(now) => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(entry) = entries.get_mut(key) {
            if entry.live(now) {
                entry.expires_at = Some(now + Duration::from_secs(ttl_seconds));
            } else {
                entries.remove(key);
            }
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.live(now));
        Ok(entries
            .keys()
            .filter(|key| glob_matches(pattern, key))
            .cloned()
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.live(now) => Ok(match entry.expires_at {
                Some(deadline) => deadline.duration_since(now).as_secs_f64().round() as i64,
                None => -1,
            }),
            Some(_) => {
                entries.remove(key);
                Ok(-2)
            }
            None => Ok(-2),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.live(now) => match &entry.value {
                Value::Hash(fields) => Ok(fields.get(field).cloned()),
                Value::Scalar(_) => Ok(None),
            },
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if !entry.live(now) {
                    entry.value = Value::Hash(HashMap::new());
                    entry.expires_at = None;
                }
            })
            .or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
        if let Value::Hash(fields) = &mut entry.value {
            fields.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            if let Value::Hash(fields) = &mut entry.value {
                fields.remove(field);
            }
        }
        Ok(())
    }
}

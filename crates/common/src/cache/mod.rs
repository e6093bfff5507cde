//! Two-tier answer cache plumbing
//!
//! Provides:
//! - A `CacheStore` capability trait over JSON string values
//! - `RedisCache`: multiplexed async Redis backend with key prefixing
//! - `MemoryCache`: in-process backend for tests and memory-only deployments
//! - Stage-aware key builders (answer / reduce / keywords namespaces)
//! - `SessionCache` / `GlobalCache` wrappers implementing the two tiers
//! - `SingleFlight`: per-key mutual exclusion so concurrent misses for the
//!   same key serialize instead of duplicating generation work

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Default TTL in seconds (0 = no expiry)
    pub default_ttl_secs: u64,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            default_ttl_secs: 0,
            key_prefix: "answerforge".to_string(),
        }
    }
}

/// Capability trait for cache backends
///
/// Values are JSON text; typed access goes through the `get`/`set` helpers
/// on the tier wrappers below.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a raw value
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Set a raw value
    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Check backend connectivity
    async fn ping(&self) -> Result<()>;
}

/// Redis cache backend
pub struct RedisCache {
    connection: RwLock<MultiplexedConnection>,
    config: CacheConfig,
}

impl RedisCache {
    /// Create a new Redis cache client
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            config,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> =
            conn.get(&full_key).await.map_err(|e| AppError::CacheError {
                message: format!("Failed to get key '{}': {}", full_key, e),
            })?;

        match &value {
            Some(_) => debug!(key = %full_key, "Cache hit"),
            None => debug!(key = %full_key, "Cache miss"),
        }
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let ttl = self.config.default_ttl_secs;
        if ttl > 0 {
            let _: () = conn
                .set_ex(&full_key, value, ttl)
                .await
                .map_err(|e| AppError::CacheError {
                    message: format!("Failed to set key '{}': {}", full_key, e),
                })?;
        } else {
            let _: () = conn
                .set(&full_key, value)
                .await
                .map_err(|e| AppError::CacheError {
                    message: format!("Failed to set key '{}': {}", full_key, e),
                })?;
        }

        debug!(key = %full_key, ttl_secs = ttl, "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let deleted: i32 = conn.del(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to delete key '{}': {}", full_key, e),
        })?;

        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let exists: bool = conn.exists(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to check key '{}': {}", full_key, e),
        })?;

        Ok(exists)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// In-process cache backend
///
/// Used by tests and by `memory_only` deployments that run without Redis.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Cache key builders
///
/// Query text is hashed so arbitrary user input never lands in a key.
/// Stage namespaces keep answers, reductions, and keyword sets apart.
pub mod keys {
    use super::{Digest, Sha256};

    /// Hex digest of the normalized (trimmed) query text
    pub fn query_hash(query: &str) -> String {
        let digest = Sha256::digest(query.trim().as_bytes());
        hex::encode(digest)
    }

    /// Key for a generated answer
    pub fn answer(query: &str) -> String {
        format!("answer:{}", query_hash(query))
    }

    /// Key for a reduction result
    pub fn reduce(query: &str) -> String {
        format!("reduce:{}", query_hash(query))
    }

    /// Key for an extracted keyword set
    pub fn keywords(query: &str) -> String {
        format!("keywords:{}", query_hash(query))
    }
}

/// Session-scoped cache tier
///
/// Every key is additionally scoped by a thread id; one conversation's memo
/// table never collides with another's.
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn CacheStore>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    fn scoped(key: &str, thread_id: &str) -> String {
        format!("session:{}:{}", thread_id, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, thread_id: &str) -> Result<Option<T>> {
        match self.store.get_raw(&Self::scoped(key, thread_id)).await? {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, thread_id: &str) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;
        self.store.set_raw(&Self::scoped(key, thread_id), &json).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

/// Global cache tier, shared across all sessions
///
/// Last-writer-wins on conflicting concurrent writes to the same key.
#[derive(Clone)]
pub struct GlobalCache {
    store: Arc<dyn CacheStore>,
}

impl GlobalCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    fn scoped(key: &str) -> String {
        format!("global:{}", key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get_raw(&Self::scoped(key)).await? {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;
        self.store.set_raw(&Self::scoped(key), &json).await
    }
}

/// Per-key mutual exclusion for cache fills
///
/// The first task to acquire a key holds the guard while it computes and
/// stores the value; concurrent tasks for the same key wait, then re-check
/// the cache instead of recomputing.
#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the per-key lock, creating it on first use
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inflight = self.inflight.lock().await;
            // Drop locks nobody is waiting on anymore
            inflight.retain(|_, l| Arc::strong_count(l) > 1);
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_key_builders() {
        let a = keys::answer("what is attention?");
        let b = keys::answer("  what is attention?  ");
        // Trimming normalizes the query before hashing
        assert_eq!(a, b);
        assert!(a.starts_with("answer:"));
        assert!(keys::reduce("q").starts_with("reduce:"));
        assert!(keys::keywords("q").starts_with("keywords:"));
        assert_ne!(keys::answer("q"), keys::reduce("q"));
    }

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let store = MemoryCache::new();
        assert!(store.get_raw("missing").await.unwrap().is_none());

        store.set_raw("k", "\"v\"").await.unwrap();
        assert_eq!(store.get_raw("k").await.unwrap().as_deref(), Some("\"v\""));
        assert!(store.exists("k").await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_scope_isolation() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let session = SessionCache::new(store);

        session.set("answer:x", &"hello".to_string(), "t1").await.unwrap();
        let other: Option<String> = session.get("answer:x", "t2").await.unwrap();
        assert!(other.is_none());
        let same: Option<String> = session.get("answer:x", "t1").await.unwrap();
        assert_eq!(same.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_single_flight_serializes_same_key() {
        let flights = Arc::new(SingleFlight::new());
        let computed = Arc::new(AtomicUsize::new(0));
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let computed = computed.clone();
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let _guard = flights.acquire("answer:q").await;
                if store.get_raw("answer:q").await.unwrap().is_none() {
                    computed.fetch_add(1, Ordering::SeqCst);
                    store.set_raw("answer:q", "\"r\"").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Only the leader computed; everyone else re-checked and reused
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }
}

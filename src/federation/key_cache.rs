//! Public Key Caching
//!
//! Caches fetched public keys to reduce remote requests. Entries are keyed by
//! the signature `keyId` and expire after a configured TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::AppError;

/// Cached public key entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedKey {
    /// keyId the key was fetched for
    pub key_id: String,
    /// Actor URI owning the key
    pub owner: String,
    /// PEM-encoded public key
    pub pem: String,
    /// Owner's preferredUsername, if known
    pub preferred_username: Option<String>,
    /// When this entry was cached
    pub cached_at: DateTime<Utc>,
}

/// Storage for fetched public keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyCache: Send + Sync {
    /// Return a non-expired entry for `key_id`.
    async fn get(&self, key_id: &str) -> Result<Option<CachedKey>, AppError>;

    /// Insert or replace an entry.
    async fn put(&self, entry: CachedKey) -> Result<(), AppError>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn invalidate(&self, key_id: &str) -> Result<(), AppError>;

    /// Remove expired entries and return how many were dropped.
    async fn prune_expired(&self) -> Result<u64, AppError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    key: CachedKey,
    inserted: Instant,
}

/// In-process key cache
///
/// Thread-safe cache for remote actor public keys. Contents are lost on
/// restart.
pub struct MemoryKeyCache {
    /// Cache storage: key_id -> cached key
    cache: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    /// TTL for cached keys
    ttl: Duration,
}

impl MemoryKeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn is_valid(&self, entry: &MemoryEntry) -> bool {
        entry.inserted.elapsed() < self.ttl
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyCache for MemoryKeyCache {
    async fn get(&self, key_id: &str) -> Result<Option<CachedKey>, AppError> {
        let cache = self.cache.read().await;
        match cache.get(key_id) {
            Some(entry) if self.is_valid(entry) => Ok(Some(entry.key.clone())),
            Some(_) => {
                tracing::debug!(key_id, "Public key cache expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CachedKey) -> Result<(), AppError> {
        let mut cache = self.cache.write().await;
        cache.insert(
            entry.key_id.clone(),
            MemoryEntry {
                key: entry,
                inserted: Instant::now(),
            },
        );
        Ok(())
    }

    async fn invalidate(&self, key_id: &str) -> Result<(), AppError> {
        let mut cache = self.cache.write().await;
        cache.remove(key_id);
        tracing::debug!(key_id, "Invalidated public key cache entry");
        Ok(())
    }

    async fn prune_expired(&self) -> Result<u64, AppError> {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        let ttl = self.ttl;
        cache.retain(|_, entry| entry.inserted.elapsed() < ttl);
        let removed = (before - cache.len()) as u64;

        if removed > 0 {
            tracing::info!("Pruned {} expired public key cache entries", removed);
        }
        Ok(removed)
    }
}

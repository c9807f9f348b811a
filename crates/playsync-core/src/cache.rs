//! Short-TTL session cache.
//!
//! An in-memory key/value memoization layer shared by every component to
//! avoid redundant remote calls (for example "is the server reachable").
//! Values are stored as JSON so any serializable type can be memoized.
//!
//! # Example
//!
//! ```rust,ignore
//! use playsync_core::cache::SessionCache;
//!
//! let cache = SessionCache::new(SessionCacheConfig::default());
//! cache.put("isServerOnline", &true).await;
//! assert_eq!(cache.get::<bool>("isServerOnline").await, Some(true));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SessionCacheConfig;

/// Cache key memoizing the server reachability check.
pub const SERVER_ONLINE_KEY: &str = "isServerOnline";

/// One memoized value.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Statistics from a cache cleanup operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheCleanupStats {
    /// Number of expired entries removed.
    pub expired_entries: usize,
    /// Number of entries left.
    pub remaining_entries: usize,
}

/// Statistics about the current cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of entries, expired ones included.
    pub total_entries: usize,
    /// Entries still within their TTL.
    pub live_entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed or found an expired entry.
    pub misses: u64,
    /// Whether caching is enabled.
    pub enabled: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Session cache handle; clones share the same storage.
#[derive(Debug, Clone)]
pub struct SessionCache {
    config: SessionCacheConfig,
    state: Arc<RwLock<CacheState>>,
}

impl SessionCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: SessionCacheConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CacheState::default())),
        }
    }

    /// Check if caching is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Memoize a value with the default TTL.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.put_with_ttl(key, value, self.config.ttl()).await;
    }

    /// Memoize a value with an explicit TTL.
    pub async fn put_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        if !self.config.enabled {
            return;
        }

        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize cache value for {}: {}", key, e);
                return;
            }
        };

        let mut state = self.state.write().await;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
        debug!("Cached {} for {:?}", key, ttl);
    }

    /// Look up a memoized value.
    ///
    /// Returns `None` if absent, expired, or not decodable as `T`. Expired
    /// entries are evicted on access.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        let mut state = self.state.write().await;
        let now = Instant::now();

        let value = match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.value.clone(),
            Some(_) => {
                state.entries.remove(key);
                state.misses += 1;
                debug!("Cache entry {} expired", key);
                return None;
            }
            None => {
                state.misses += 1;
                return None;
            }
        };

        if let Ok(decoded) = serde_json::from_value(value) {
            state.hits += 1;
            Some(decoded)
        } else {
            state.misses += 1;
            None
        }
    }

    /// Remove one entry.
    pub async fn remove(&self, key: &str) -> bool {
        self.state.write().await.entries.remove(key).is_some()
    }

    /// Drop every entry and reset counters.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = CacheState::default();
    }

    /// Evict every expired entry.
    pub async fn cleanup(&self) -> CacheCleanupStats {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));

        let stats = CacheCleanupStats {
            expired_entries: before - state.entries.len(),
            remaining_entries: state.entries.len(),
        };
        if stats.expired_entries > 0 {
            debug!("Session cache cleanup removed {} entries", stats.expired_entries);
        }
        stats
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let now = Instant::now();
        CacheStats {
            total_entries: state.entries.len(),
            live_entries: state
                .entries
                .values()
                .filter(|entry| !entry.is_expired(now))
                .count(),
            hits: state.hits,
            misses: state.misses,
            enabled: self.config.enabled,
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(SessionCacheConfig::default())
    }
}

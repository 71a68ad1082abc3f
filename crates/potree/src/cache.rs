//! Byte caches for fetched node files.
//!
//! The HTTP [`Client`](crate::Client) consults a [`Cache`] before going to
//! the network, so a node that was evicted from memory by the scheduler can
//! be reloaded without refetching its file. This is independent of the
//! point-residency LRU in [`crate::lru`], which tracks decoded nodes.
//!
//! # Implementations
//!
//! - [`MemoryCache`]: In-memory cache with an optional byte limit
//! - [`NoCache`]: Passthrough implementation that caches nothing

use crate::error::Result;
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Future type for cache get operations.
pub type GetFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Future type for cache put/remove operations.
pub type CacheFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A cache for fetched files, keyed by URL.
pub trait Cache: Send + Sync {
    /// Get data from the cache.
    ///
    /// Returns `Ok(Some(data))` if the data is cached and `Ok(None)` if not.
    fn get(&self, url: &str) -> GetFuture<'_>;

    /// Store data in the cache.
    fn put(&self, url: &str, data: Vec<u8>) -> CacheFuture<'_>;

    /// Remove data from the cache.
    fn remove(&self, url: &str) -> CacheFuture<'_>;

    /// Clear all cached data.
    fn clear(&self) -> CacheFuture<'_>;
}

/// A cache that stores nothing.
#[derive(Debug, Clone, Default)]
pub struct NoCache;

impl NoCache {
    /// Create a new no-op cache.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Cache for NoCache {
    fn get(&self, _url: &str) -> GetFuture<'_> {
        Box::pin(async { Ok(None) })
    }

    fn put(&self, _url: &str, _data: Vec<u8>) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, _url: &str) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> CacheFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Hit and miss counters of a [`MemoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found data.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped to stay under the byte limit.
    pub evictions: u64,
}

/// An in-memory cache.
///
/// Clones share the same storage. With a byte limit, the oldest inserted
/// entries are dropped first when a new entry would not fit.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    data: Arc<RwLock<MemoryCacheInner>>,
    max_size: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<String, Vec<u8>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    current_size: usize,
    stats: CacheStats,
}

impl MemoryCacheInner {
    fn take(&mut self, url: &str) -> Option<Vec<u8>> {
        let data = self.entries.remove(url)?;
        self.current_size -= data.len();
        self.order.retain(|k| k != url);
        Some(data)
    }
}

impl MemoryCache {
    /// Create a new memory cache with no size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_size: None,
        }
    }

    /// Create a new memory cache holding at most `max_size` bytes.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size: Some(max_size),
            ..Self::new()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryCacheInner> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryCacheInner> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current size of cached data in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.read().current_size
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit, miss and eviction counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.read().stats
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for MemoryCache {
    fn get(&self, url: &str) -> GetFuture<'_> {
        let mut cache = self.write();
        let result = cache.entries.get(url).cloned();
        if result.is_some() {
            cache.stats.hits += 1;
        } else {
            cache.stats.misses += 1;
        }
        Box::pin(async move { Ok(result) })
    }

    fn put(&self, url: &str, data: Vec<u8>) -> CacheFuture<'_> {
        let mut cache = self.write();
        cache.take(url);

        if let Some(max_size) = self.max_size {
            // Entries larger than the whole cache are not stored at all.
            if data.len() > max_size {
                return Box::pin(async { Ok(()) });
            }
            while cache.current_size + data.len() > max_size {
                let Some(oldest) = cache.order.pop_front() else {
                    break;
                };
                if let Some(old) = cache.entries.remove(&oldest) {
                    cache.current_size -= old.len();
                    cache.stats.evictions += 1;
                }
            }
        }

        cache.current_size += data.len();
        cache.order.push_back(url.to_string());
        cache.entries.insert(url.to_string(), data);

        Box::pin(async { Ok(()) })
    }

    fn remove(&self, url: &str) -> CacheFuture<'_> {
        self.write().take(url);
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> CacheFuture<'_> {
        let mut cache = self.write();
        cache.entries.clear();
        cache.order.clear();
        cache.current_size = 0;
        Box::pin(async { Ok(()) })
    }
}

// ============================================================================
// Result Cache
// ============================================================================
//
// Memoizes query results by exact query text. Entries are never evicted,
// expired or invalidated by writes; a populated key is never overwritten.
// Only read-only, rarely-changing queries belong here.
//
// Parameters are not part of the key: two parameterizations of the same
// statement text share one entry.
//
// ============================================================================

use crate::core::Result;
use crate::result::QueryResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Process-scoped query result cache.
///
/// Constructed explicitly and shared through `Arc` by whoever needs it.
///
/// ```
/// use querykit::{QueryCache, QueryResult};
///
/// # tokio_test::block_on(async {
/// let cache = QueryCache::new();
/// let first = cache
///     .cached_execute("SELECT * FROM users", |_| async { Ok(QueryResult::empty()) })
///     .await
///     .unwrap();
/// let second = cache
///     .cached_execute("SELECT * FROM users", |_| async { Ok(QueryResult::affected(1)) })
///     .await
///     .unwrap();
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// assert_eq!(second.rows_affected, 0);
/// # });
/// ```
#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, Arc<QueryResult>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `query`, or run `executor` and cache what
    /// it returns.
    ///
    /// Failed executions are not cached. When two callers miss on the same
    /// key concurrently both run their executor, the first stored result
    /// wins and both receive it.
    pub async fn cached_execute<F, Fut>(&self, query: &str, executor: F) -> Result<Arc<QueryResult>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<QueryResult>>,
    {
        if let Some(hit) = self.get(query).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(query, "query result served from cache");
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(executor(query.to_string()).await?);

        let mut entries = self.entries.write().await;
        let stored = entries.entry(query.to_string()).or_insert(fresh);
        debug!(query, "query result cached");
        Ok(Arc::clone(stored))
    }

    pub async fn get(&self, query: &str) -> Option<Arc<QueryResult>> {
        self.entries.read().await.get(query).cloned()
    }

    pub async fn contains(&self, query: &str) -> bool {
        self.entries.read().await.contains_key(query)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry. Counters are kept.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

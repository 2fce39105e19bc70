//! Memoized query results keyed by [`QueryKey`]
//!
//! The cache is an owned value: construct one, share it with `Arc` if several
//! tasks need it, and clear or invalidate it explicitly. Nothing is evicted on
//! its own.
//!
//! First population of a key is single-flight. Every key maps to a
//! [`tokio::sync::OnceCell`]; concurrent callers for the same key await the
//! same initialization instead of each running the query. A failed
//! computation leaves the cell empty, so the next caller tries again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::connection::Store;
use crate::error::{Result, StoreError};
use crate::query::{Query, QueryKey};
use crate::value::Record;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
}

pub struct ResultCache<V> {
    entries: Mutex<HashMap<QueryKey, Arc<OnceCell<CacheEntry<V>>>>>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the value stored for `key`, computing it with `f` on first use.
    pub async fn cached<F>(&self, key: impl Into<QueryKey>, f: F) -> Result<V>
    where
        F: AsyncFnOnce() -> Result<V>,
    {
        let key = key.into();
        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        if let Some(entry) = cell.get() {
            debug!(key = %key, "cache hit");
            return Ok(entry.value.clone());
        }

        let miss = key.clone();
        let computed = cell
            .get_or_try_init(|| async move {
                debug!(key = %miss, "cache miss");
                let value = f().await?;
                info!(key = %miss, "cached query result");
                Ok::<_, StoreError>(CacheEntry {
                    value,
                    created_at: Utc::now(),
                })
            })
            .await;

        match computed {
            Ok(entry) => Ok(entry.value.clone()),
            Err(e) => {
                self.discard_empty(&key, &cell).await;
                Err(e)
            }
        }
    }

    /// Remove `cell` from the map after a failed computation, unless another
    /// caller is still waiting on it.
    async fn discard_empty(&self, key: &QueryKey, cell: &Arc<OnceCell<CacheEntry<V>>>) {
        let mut entries = self.entries.lock().await;
        let unused = entries.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !cell.initialized() && Arc::strong_count(cell) == 2
        });
        if unused {
            entries.remove(key);
        }
    }

    /// Stored entry for `key`, if one has been computed
    pub async fn get(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Drop the entry for `key`; returns whether a computed value was removed
    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        let removed = self.entries.lock().await.remove(key);
        let had_value = removed.is_some_and(|cell| cell.initialized());
        if had_value {
            debug!(key = %key, "cache entry invalidated");
        }
        had_value
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        debug!(entries = entries.len(), "cache cleared");
        entries.clear();
    }

    /// Number of computed entries
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Fetch `query` through `cache`, opening a connection for the call.
    ///
    /// A hit still opens and closes a connection; only the statement is
    /// skipped.
    pub async fn fetch_cached(&self, cache: &ResultCache<Vec<Record>>, query: &Query) -> Result<Vec<Record>> {
        self.with_connection(query.name(), async |conn| {
            cache
                .cached(query, async || query.fetch_all(conn).await)
                .await
        })
        .await
    }
}

//! Concurrent fan-out with ordered results and fail-fast cancellation
//!
//! Operations are polled together on the caller's task through a
//! [`FuturesUnordered`], at most `limit` at a time. Results come back in input
//! order. The first failure is returned immediately and every operation still
//! pending is dropped: it stops at its next await point, its scoped
//! connection is released by `Drop`, and anything it already committed
//! stays committed.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::connection::Store;
use crate::error::Result;
use crate::query::Query;
use crate::value::Record;

/// Bounded task group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    limit: Option<usize>,
}

impl Fanout {
    /// All operations in flight at once
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `limit` operations in flight; `0` means no limit
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: (limit > 0).then_some(limit),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_limit(config.fanout_limit)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub async fn run<T, I, Fut>(&self, ops: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>>,
    {
        let ops: Vec<Fut> = ops.into_iter().collect();
        let total = ops.len();
        let limit = self.limit.unwrap_or(total).max(1);
        debug!(operations = total, limit, "fanout started");

        let mut queue = ops.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        for (index, op) in queue.by_ref().take(limit) {
            in_flight.push(indexed(index, op));
        }

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        while let Some((index, outcome)) = in_flight.next().await {
            match outcome {
                Ok(value) => {
                    slots[index] = Some(value);
                    if let Some((next, op)) = queue.next() {
                        in_flight.push(indexed(next, op));
                    }
                }
                Err(e) => {
                    warn!(
                        failed = index,
                        cancelled = in_flight.len() + queue.len(),
                        error = %e,
                        "fanout operation failed, cancelling the rest"
                    );
                    return Err(e);
                }
            }
        }

        debug!(operations = total, "fanout finished");
        Ok(slots.into_iter().flatten().collect())
    }
}

async fn indexed<T, Fut>(index: usize, op: Fut) -> (usize, Result<T>)
where
    Fut: Future<Output = Result<T>>,
{
    (index, op.await)
}

/// Run every operation concurrently; results in input order, first error wins.
pub async fn fanout<T, I, Fut>(ops: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T>>,
{
    Fanout::new().run(ops).await
}

impl Store {
    /// [`Fanout::run`] bounded by the configured `fanout_limit`
    pub async fn fanout<T, I, Fut>(&self, ops: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>>,
    {
        Fanout::from_config(self.config()).run(ops).await
    }

    /// Run each query on its own connection concurrently.
    ///
    /// `limit` caps how many connections are open at once; `0` means one per
    /// query.
    pub async fn fanout_queries(&self, queries: &[Query], limit: usize) -> Result<Vec<Vec<Record>>> {
        let ops = queries.iter().map(|query| {
            self.with_connection(query.name(), async move |conn| query.fetch_all(conn).await)
        });
        Fanout::with_limit(limit).run(ops).await
    }
}

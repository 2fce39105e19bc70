//! Lazy row-by-row traversal with O(1) memory usage.
//!
//! # Architecture
//!
//! [`RowStream`] wraps one driver cursor. Rows are decoded into [`Record`]s
//! only when polled, so a caller walking a million-row table holds one row at
//! a time regardless of table size.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────────┐
//! │    open     │  poll → decode one row
//! └──────┬──────┘
//!        │ cursor exhausted, error, close() or drop
//!        ▼
//! ┌─────────────┐
//! │  finished   │  cursor released, always yields None
//! └─────────────┘
//! ```
//!
//! A stream is single-pass: there is no rewind. Re-running the query opens a
//! new cursor. The stream borrows its connection mutably, so nothing else can
//! use that connection until the stream is finished or dropped.
//!
//! ## Example
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use lazystore_core::{users, Store, StoreConfig};
//!
//! # async fn run() -> lazystore_core::Result<()> {
//! let store = Store::new(StoreConfig::new("users.db"));
//! let mut scoped = store.acquire().await?;
//! let mut rows = users::stream_users(scoped.conn());
//! while let Some(user) = rows.try_next().await? {
//!     println!("{}", user.text("name")?);
//! }
//! drop(rows);
//! scoped.release().await;
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream};
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::value::Record;

type Cursor<'c> = BoxStream<'c, std::result::Result<SqliteRow, sqlx::Error>>;

/// Single-pass stream of decoded rows bound to one cursor
pub struct RowStream<'c> {
    operation: String,
    cursor: Option<Cursor<'c>>,
    yielded: u64,
}

impl<'c> RowStream<'c> {
    pub(crate) fn new(operation: &str, cursor: Cursor<'c>) -> Self {
        Self {
            operation: operation.to_owned(),
            cursor: Some(cursor),
            yielded: 0,
        }
    }

    /// Rows produced so far
    pub fn rows_yielded(&self) -> u64 {
        self.yielded
    }

    /// Whether the cursor has been released
    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    /// Abandon the stream early, releasing the cursor
    pub fn close(mut self) {
        self.finish("closed");
    }

    fn finish(&mut self, reason: &'static str) {
        if self.cursor.take().is_some() {
            debug!(
                operation = %self.operation,
                rows = self.yielded,
                reason,
                "row stream released cursor"
            );
        }
    }
}

impl Stream for RowStream<'_> {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(cursor) = this.cursor.as_mut() else {
            return Poll::Ready(None);
        };

        match cursor.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.finish("exhausted");
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(row))) => match Record::from_row(&row) {
                Ok(record) => {
                    this.yielded += 1;
                    Poll::Ready(Some(Ok(record)))
                }
                Err(e) => {
                    this.finish("decode error");
                    Poll::Ready(Some(Err(e)))
                }
            },
            Poll::Ready(Some(Err(e))) => {
                this.finish("query error");
                Poll::Ready(Some(Err(StoreError::query(this.operation.as_str(), e))))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.cursor {
            Some(_) => (0, None),
            None => (0, Some(0)),
        }
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        self.finish("dropped");
    }
}

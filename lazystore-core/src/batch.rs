//! Fixed-size batching over a fallible row stream

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;
use tracing::debug;

use crate::connection::Store;
use crate::error::{Result, StoreError};

/// Group `stream` into `Vec`s of exactly `size` items; the last may be shorter.
///
/// Memory held is one batch. An error from the inner stream is yielded in
/// place of the batch being filled (its partial rows are dropped) and ends
/// the sequence.
pub fn batches<S, T>(stream: S, size: usize) -> Result<Batches<S, T>>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    if size == 0 {
        return Err(StoreError::invalid_config("batch size must be positive"));
    }
    Ok(Batches {
        inner: Some(stream),
        size,
        buffer: Vec::with_capacity(size),
        emitted: 0,
    })
}

pub struct Batches<S, T> {
    inner: Option<S>,
    size: usize,
    buffer: Vec<T>,
    emitted: u64,
}

// Nothing is structurally pinned
impl<S: Unpin, T> Unpin for Batches<S, T> {}

impl<S, T> Batches<S, T> {
    pub fn batch_size(&self) -> usize {
        self.size
    }

    /// Batches yielded so far
    pub fn batches_emitted(&self) -> u64 {
        self.emitted
    }

    fn take_batch(&mut self) -> Vec<T> {
        self.emitted += 1;
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.size))
    }
}

impl<S, T> Stream for Batches<S, T>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    type Item = Result<Vec<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(item))) => {
                    this.buffer.push(item);
                    if this.buffer.len() == this.size {
                        return Poll::Ready(Some(Ok(this.take_batch())));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    debug!(dropped = this.buffer.len(), "batching stopped on error");
                    this.inner = None;
                    this.buffer.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(this.take_batch())));
                }
            }
        }
    }
}

impl Store {
    /// [`batches`] with the configured `batch_size`
    pub fn batches<S, T>(&self, stream: S) -> Result<Batches<S, T>>
    where
        S: Stream<Item = Result<T>> + Unpin,
    {
        batches(stream, self.config().batch_size)
    }
}

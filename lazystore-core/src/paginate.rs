//! On-demand pagination
//!
//! A [`Paginator`] fetches one bounded page per request from a [`PageSource`],
//! resuming at the [`Continuation`] the previous page left behind. Pages are
//! fetched only when asked for; a page shorter than the page size (or an
//! empty one) ends the sequence and no further fetch is issued.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::Serialize;
use tracing::debug;

use crate::connection::Store;
use crate::error::{Result, StoreError};
use crate::query::Query;
use crate::value::Record;

/// Where the next page starts. Opaque to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Continuation {
    offset: u64,
}

impl Continuation {
    /// Position of the first row
    pub fn start() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn advance(self, rows: usize) -> Self {
        Self {
            offset: self.offset + rows as u64,
        }
    }
}

/// Page of rows plus the marker for the page after it
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub rows: Vec<Record>,
    pub next: Continuation,
    /// 0-based
    pub number: u64,
}

impl Page {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Anything that can return at most `size` rows starting at a continuation
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, at: Continuation, size: usize) -> Result<Vec<Record>>;
}

/// Pages over a query's result set, one scoped connection per page.
///
/// The query should have a stable order (`ORDER BY`) so that consecutive
/// windows neither skip nor repeat rows.
#[derive(Debug, Clone)]
pub struct QueryPages {
    store: Store,
    query: Query,
}

impl QueryPages {
    pub fn new(store: Store, query: Query) -> Self {
        Self { store, query }
    }
}

#[async_trait]
impl PageSource for QueryPages {
    async fn fetch_page(&self, at: Continuation, size: usize) -> Result<Vec<Record>> {
        let window = self.query.window(size, at.offset());
        let mut scoped = self.store.acquire().await?;
        let rows = window.fetch_all(scoped.conn()).await;
        scoped.release().await;
        rows
    }
}

impl Store {
    /// Pages over `query` with the configured `page_size`
    pub fn paginate(&self, query: Query) -> Result<Paginator<QueryPages>> {
        Paginator::new(QueryPages::new(self.clone(), query), self.config().page_size)
    }
}

pub struct Paginator<P> {
    source: P,
    size: usize,
    next: Continuation,
    number: u64,
    finished: bool,
    fetches: u64,
}

impl<P: PageSource> Paginator<P> {
    pub fn new(source: P, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(StoreError::invalid_config("page size must be positive"));
        }
        Ok(Self {
            source,
            size,
            next: Continuation::start(),
            number: 0,
            finished: false,
            fetches: 0,
        })
    }

    pub fn page_size(&self) -> usize {
        self.size
    }

    /// Fetches issued so far
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetch the next page, or `None` once the sequence has ended.
    ///
    /// On error the position is unchanged, so calling again retries the same
    /// page.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.finished {
            return Ok(None);
        }

        self.fetches += 1;
        let rows = self.source.fetch_page(self.next, self.size).await?;
        debug!(
            page = self.number,
            offset = self.next.offset(),
            rows = rows.len(),
            "fetched page"
        );

        if rows.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        if rows.len() < self.size {
            self.finished = true;
        }

        self.next = self.next.advance(rows.len());
        let page = Page {
            rows,
            next: self.next,
            number: self.number,
        };
        self.number += 1;
        Ok(Some(page))
    }

    /// Pages as a stream; ends after the last page or the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<Page>> {
        stream::try_unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await?;
            Ok::<_, StoreError>(page.map(|page| (page, paginator)))
        })
    }
}

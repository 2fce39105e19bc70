//! Scoped connection management
//!
//! Every operation gets its own SQLite connection, opened on entry and closed
//! on exit. There is no pool: the layer wraps a single logical store, and
//! concurrent callers (see [`crate::fanout`]) simply open independent
//! connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

/// How long SQLite waits on a locked database before reporting SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Acquire/release counters, shared by a store and every scope it hands out
#[derive(Debug, Default)]
pub struct ConnectionStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl ConnectionStats {
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Connections currently held
    pub fn open(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

/// Handle to one SQLite database
#[derive(Debug, Clone)]
pub struct Store {
    config: StoreConfig,
    options: SqliteConnectOptions,
    stats: Arc<ConnectionStats>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal) // readers don't block the writer
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        Self {
            config,
            options,
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Connection target, for logs and errors
    pub fn target(&self) -> String {
        self.config.database.display().to_string()
    }

    /// Open a connection owned by the returned scope.
    ///
    /// Prefer [`Store::with_connection`]; hold a scope directly only when a
    /// [`crate::RowStream`] must borrow the connection across awaits.
    pub async fn acquire(&self) -> Result<ScopedConnection> {
        let target = self.target();
        let conn = SqliteConnection::connect_with(&self.options)
            .await
            .map_err(|e| StoreError::connection(target.as_str(), e))?;

        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        info!(target_db = %target, "database connection opened");

        Ok(ScopedConnection {
            conn: Some(conn),
            target,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Run `f` with a fresh connection, releasing it on every exit path.
    ///
    /// If the connection cannot be opened, `f` is never called and
    /// [`StoreError::Connection`] is returned.
    ///
    /// ```no_run
    /// # use lazystore_core::{users, Store, StoreConfig};
    /// # async fn run() -> lazystore_core::Result<()> {
    /// let store = Store::new(StoreConfig::new("users.db"));
    /// let total = store
    ///     .with_connection("count_users", async |conn| users::count_users(conn).await)
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_connection<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut scoped = self.acquire().await?;
        let result = f(scoped.conn()).await;
        if let Err(e) = &result {
            debug!(operation, error = %e, "operation failed, releasing connection");
        }
        scoped.release().await;
        result
    }
}

/// A connection that is released exactly once.
///
/// [`ScopedConnection::release`] closes it gracefully; if the scope is dropped
/// instead (early return, panic, cancelled future) `Drop` releases it.
pub struct ScopedConnection {
    conn: Option<SqliteConnection>,
    target: String,
    stats: Arc<ConnectionStats>,
}

impl ScopedConnection {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            // release() consumes the scope, so the connection is present for
            // as long as the scope can be borrowed
            None => unreachable!("scoped connection used after release"),
        }
    }

    /// Close the connection gracefully
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.stats.released.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = conn.close().await {
                warn!(target_db = %self.target, error = %e, "connection did not close cleanly");
            }
            info!(target_db = %self.target, "database connection closed");
        }
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            self.stats.released.fetch_add(1, Ordering::SeqCst);
            info!(target_db = %self.target, "database connection closed on drop");
        }
    }
}

//! Transaction boundaries
//!
//! [`TransactionScope`] is the explicit form: `commit` and `rollback` consume
//! the scope, so a finished transaction cannot be touched again. The
//! [`with_transaction`] wrapper picks commit or rollback from the body's
//! result.

use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Sqlite, Transaction};
use tracing::{debug, error, info, warn};

use crate::connection::Store;
use crate::error::{Result, StoreError, TxStage};
use crate::query::Query;
use crate::value::Record;

/// An open transaction on a borrowed connection.
///
/// Dropping an open scope rolls back (the driver does this when the
/// underlying transaction is dropped).
pub struct TransactionScope<'c> {
    tx: Transaction<'c, Sqlite>,
    operation: String,
}

impl<'c> TransactionScope<'c> {
    pub async fn begin(conn: &'c mut SqliteConnection, operation: &str) -> Result<Self> {
        let tx = conn
            .begin()
            .await
            .map_err(|e| StoreError::transaction(operation, TxStage::Begin, e))?;
        debug!(operation, "transaction opened");
        Ok(Self {
            tx,
            operation: operation.to_owned(),
        })
    }

    /// Connection to run statements on inside the transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        let Self { tx, operation } = self;
        tx.commit()
            .await
            .map_err(|e| StoreError::transaction(operation.as_str(), TxStage::Commit, e))?;
        info!(operation = %operation, "transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let Self { tx, operation } = self;
        tx.rollback()
            .await
            .map_err(|e| StoreError::transaction(operation.as_str(), TxStage::Rollback, e))?;
        info!(operation = %operation, "transaction rolled back");
        Ok(())
    }
}

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
///
/// The body's error is returned unchanged after the rollback. A failed
/// rollback is logged; the body's error still wins because it is the cause.
pub async fn with_transaction<T, F>(conn: &mut SqliteConnection, operation: &str, f: F) -> Result<T>
where
    F: AsyncFnOnce(&mut SqliteConnection) -> Result<T>,
{
    let mut scope = TransactionScope::begin(conn, operation).await?;
    match f(scope.conn()).await {
        Ok(value) => {
            scope.commit().await?;
            Ok(value)
        }
        Err(e) => {
            warn!(operation, error = %e, "transaction body failed, rolling back");
            if let Err(rollback_err) = scope.rollback().await {
                error!(operation, error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

impl Store {
    /// Connection scope plus transaction scope around `f`
    pub async fn in_transaction<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut SqliteConnection) -> Result<T>,
    {
        self.with_connection(operation, async move |conn| {
            with_transaction(conn, operation, f).await
        })
        .await
    }

    /// Run one parameterized statement in its own connection and transaction,
    /// returning whatever rows it produces.
    pub async fn execute_scoped(&self, query: &Query) -> Result<Vec<Record>> {
        self.in_transaction(query.name(), async |conn| query.fetch_all(conn).await)
            .await
    }
}

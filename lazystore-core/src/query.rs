//! Query text plus bound parameters.
//!
//! A [`Query`] is a plain value: it can be logged, turned into a canonical
//! [`QueryKey`] for the result cache, and executed any number of times
//! against a borrowed connection.

use std::borrow::Cow;
use std::fmt;

use sqlx::sqlite::{SqliteArguments, SqliteConnection};
use sqlx::Sqlite;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::stream::RowStream;
use crate::value::{Record, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    name: Cow<'static, str>,
    sql: Cow<'static, str>,
    params: Vec<Value>,
}

impl Query {
    pub fn new(sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: Cow::Borrowed("query"),
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Parameterless query usable in a `static`, so row streams over it can
    /// outlive the caller's stack frame.
    pub const fn from_static(name: &'static str, sql: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            sql: Cow::Borrowed(sql),
            params: Vec::new(),
        }
    }

    /// Operation name used in logs and error context
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Bind the next `?` placeholder
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Canonical cache key: whitespace-normalized text and rendered parameters
    pub fn key(&self) -> QueryKey {
        let sql = self.sql.split_whitespace().collect::<Vec<_>>().join(" ");
        let params = self
            .params
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        QueryKey(format!("{sql} [{params}]"))
    }

    /// The same statement restricted to `limit` rows starting at `offset`
    pub fn window(&self, limit: usize, offset: u64) -> Query {
        Query {
            name: self.name.clone(),
            sql: Cow::Owned(format!("{} LIMIT ? OFFSET ?", self.sql.trim_end())),
            params: self.params.clone(),
        }
        .bind(limit as i64)
        .bind(offset as i64)
    }

    fn prepare(&self) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
        self.log();
        self.params
            .iter()
            .fold(sqlx::query(&self.sql), |query, param| match param {
                Value::Null => query.bind(None::<i64>),
                Value::Integer(n) => query.bind(*n),
                Value::Real(x) => query.bind(*x),
                Value::Text(s) => query.bind(s.as_str()),
            })
    }

    fn log(&self) {
        debug!(
            operation = %self.name,
            sql = %self.sql,
            params = self.params.len(),
            "executing query"
        );
    }

    /// Run the statement and collect every row
    pub async fn fetch_all(&self, conn: &mut SqliteConnection) -> Result<Vec<Record>> {
        let rows = self
            .prepare()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| StoreError::query(self.name.as_ref(), e))?;
        rows.iter().map(Record::from_row).collect()
    }

    /// Run the statement and return the first row, if any
    pub async fn fetch_optional(&self, conn: &mut SqliteConnection) -> Result<Option<Record>> {
        let row = self
            .prepare()
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StoreError::query(self.name.as_ref(), e))?;
        row.as_ref().map(Record::from_row).transpose()
    }

    /// Run a statement that returns no rows; yields the affected row count
    pub async fn execute(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let done = self
            .prepare()
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::query(self.name.as_ref(), e))?;
        Ok(done.rows_affected())
    }

    /// Open a lazy, single-pass cursor over the result set
    pub fn stream<'c>(&'c self, conn: &'c mut SqliteConnection) -> RowStream<'c> {
        RowStream::new(self.name.as_ref(), self.prepare().fetch(conn))
    }
}

/// Canonical identity of a query invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueryKey {
    fn from(key: &str) -> Self {
        QueryKey(key.to_owned())
    }
}

impl From<String> for QueryKey {
    fn from(key: String) -> Self {
        QueryKey(key)
    }
}

impl From<&Query> for QueryKey {
    fn from(query: &Query) -> Self {
        query.key()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

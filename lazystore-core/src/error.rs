//! Structured error types for lazystore-core.
//!
//! Every failure the data-access layer can surface is one of these variants.
//! Retry classification lives here too ([`StoreError::is_transient`]) so that
//! it depends on nothing but the error value itself.

use std::fmt;

use thiserror::Error;

/// SQLite primary result codes treated as momentary unavailability.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Transaction lifecycle step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    Begin,
    Commit,
    Rollback,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TxStage::Begin => "begin",
            TxStage::Commit => "commit",
            TxStage::Rollback => "rollback",
        };
        f.write_str(stage)
    }
}

/// Main error type for lazystore-core operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not acquire a connection to the store
    #[error("Failed to connect to '{target}': {source}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// Retryable failure (momentary store unavailability)
    #[error("Transient failure in '{operation}': {message}")]
    Transient { operation: String, message: String },

    /// All attempts failed with transient errors
    #[error("'{operation}' failed after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last: Box<StoreError>,
    },

    /// Beginning or committing a transaction failed
    #[error("Transaction {stage} failed for '{operation}': {source}")]
    Transaction {
        operation: String,
        stage: TxStage,
        #[source]
        source: sqlx::Error,
    },

    /// Statement failed in the driver
    #[error("Query failed in '{operation}': {source}")]
    Query {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// Average requested over zero rows
    #[error("Cannot average '{column}' over an empty stream")]
    EmptyAggregate { column: String },

    /// Column missing or of the wrong type
    #[error("Cannot decode column '{column}': {reason}")]
    Decode { column: String, reason: String },

    /// Configuration rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Result type alias for lazystore-core operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Create a connection error for `target`
    pub fn connection(target: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Connection {
            target: target.into(),
            source,
        }
    }

    /// Create a transient (retryable) error
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wrap the last transient failure once the attempt budget is spent
    pub fn retry_exhausted(operation: impl Into<String>, attempts: u32, last: StoreError) -> Self {
        Self::RetryExhausted {
            operation: operation.into(),
            attempts,
            last: Box::new(last),
        }
    }

    /// Create a transaction lifecycle error
    pub fn transaction(operation: impl Into<String>, stage: TxStage, source: sqlx::Error) -> Self {
        Self::Transaction {
            operation: operation.into(),
            stage,
            source,
        }
    }

    /// Create a query error
    pub fn query(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Query {
            operation: operation.into(),
            source,
        }
    }

    /// Create an empty-aggregate error
    pub fn empty_aggregate(column: impl Into<String>) -> Self {
        Self::EmptyAggregate {
            column: column.into(),
        }
    }

    /// Create a decode error
    pub fn decode(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Create a config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether a retry may succeed.
    ///
    /// Only [`StoreError::Transient`] and driver errors carrying
    /// `SQLITE_BUSY`/`SQLITE_LOCKED` qualify, including a busy `BEGIN` or
    /// `COMMIT`. Everything else, including [`StoreError::RetryExhausted`],
    /// is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Query { source, .. } => is_busy(source),
            Self::Transaction {
                stage: TxStage::Begin | TxStage::Commit,
                source,
                ..
            } => is_busy(source),
            _ => false,
        }
    }

    /// Number of attempts made, for errors produced by a retry loop
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        // Extended result codes keep the primary code in the low byte
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

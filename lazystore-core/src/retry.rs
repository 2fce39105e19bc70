//! Bounded retries with linear backoff
//!
//! Attempt `n` (starting at 1) that fails transiently is followed by a sleep of
//! `n * base_delay`. Whether a failure is transient is decided by
//! [`StoreError::is_transient`] alone.

use std::time::Duration;

use sqlx::sqlite::SqliteConnection;
use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::connection::Store;
use crate::error::{Result, StoreError};
use crate::transaction::with_transaction;

/// One failed attempt that will be retried
#[derive(Debug)]
pub struct RetryAttempt {
    /// 1-based attempt number that failed
    pub attempt: u32,
    /// Backoff before the next attempt
    pub delay: Duration,
    pub error: StoreError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(StoreError::invalid_config("max_attempts must be positive"));
        }
        Ok(Self {
            max_attempts,
            base_delay,
        })
    }

    pub fn from_config(config: &RetryConfig) -> Result<Self> {
        Self::new(config.max_attempts, config.base_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff after the given failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Call `f` until it succeeds, fails non-transiently, or the attempt
    /// budget is spent.
    pub async fn run<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: AsyncFnMut() -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => {
                    self.log_success(operation, attempt);
                    return Ok(value);
                }
                Err(e) => {
                    let retry = self.next_attempt(operation, attempt, e)?;
                    tokio::time::sleep(retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// [`RetryPolicy::run`] for operations that borrow a connection on every
    /// attempt.
    pub async fn run_on<T, F>(&self, operation: &str, conn: &mut SqliteConnection, mut f: F) -> Result<T>
    where
        F: AsyncFnMut(&mut SqliteConnection) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match f(&mut *conn).await {
                Ok(value) => {
                    self.log_success(operation, attempt);
                    return Ok(value);
                }
                Err(e) => {
                    let retry = self.next_attempt(operation, attempt, e)?;
                    tokio::time::sleep(retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Decide what follows a failed attempt: `Ok` to retry after the returned
    /// delay, `Err` with the error to hand back to the caller.
    fn next_attempt(&self, operation: &str, attempt: u32, error: StoreError) -> Result<RetryAttempt> {
        if !error.is_transient() {
            return Err(error);
        }
        if attempt >= self.max_attempts {
            error!(
                operation,
                attempts = attempt,
                error = %error,
                "retries exhausted"
            );
            return Err(StoreError::retry_exhausted(operation, attempt, error));
        }

        let retry = RetryAttempt {
            attempt,
            delay: self.delay_for(attempt),
            error,
        };
        warn!(
            operation,
            attempt = retry.attempt,
            max_attempts = self.max_attempts,
            delay_ms = retry.delay.as_millis() as u64,
            error = %retry.error,
            "transient failure, retrying"
        );
        Ok(retry)
    }

    fn log_success(&self, operation: &str, attempt: u32) {
        if attempt > 1 {
            info!(operation, attempt, "succeeded after retry");
        }
    }
}

impl Store {
    /// Connection scope, retry policy and transaction scope around `f`,
    /// outermost first.
    ///
    /// Every attempt begins its own transaction, so a failed attempt's writes
    /// are rolled back before the next one starts and only the successful
    /// attempt commits.
    pub async fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: AsyncFnMut(&mut SqliteConnection) -> Result<T>,
    {
        let policy = RetryPolicy::from_config(&self.config().retry)?;
        self.with_connection(operation, async move |conn| {
            policy
                .run_on(operation, conn, async |attempt_conn| {
                    with_transaction(attempt_conn, operation, &mut f).await
                })
                .await
        })
        .await
    }
}

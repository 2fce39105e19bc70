//! One-pass statistics over a row stream
//!
//! [`AggregateState`] is a small `Copy` value; folding a row produces a new
//! state, so memory stays constant no matter how many rows go by.

use futures::stream::{Stream, TryStreamExt};
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateState {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl AggregateState {
    pub const EMPTY: AggregateState = AggregateState {
        count: 0,
        sum: 0.0,
        min: None,
        max: None,
    };

    /// State after observing `x`
    #[must_use]
    pub fn push(self, x: f64) -> Self {
        Self {
            count: self.count + 1,
            sum: self.sum + x,
            min: Some(self.min.map_or(x, |m| m.min(x))),
            max: Some(self.max.map_or(x, |m| m.max(x))),
        }
    }

    /// Arithmetic mean; `column` names the input in the error for zero rows
    pub fn mean(&self, column: &str) -> Result<f64> {
        if self.count == 0 {
            return Err(StoreError::empty_aggregate(column));
        }
        Ok(self.sum / self.count as f64)
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Fold `stream` into an [`AggregateState`] using `value` to read each item
pub async fn aggregate_by<S, T, F>(stream: S, mut value: F) -> Result<AggregateState>
where
    S: Stream<Item = Result<T>>,
    F: FnMut(&T) -> Result<f64>,
{
    stream
        .try_fold(AggregateState::EMPTY, |state, item| {
            let next = value(&item).map(|x| state.push(x));
            async move { next }
        })
        .await
}

/// Mean of the numeric `column` across every row of `stream`.
///
/// Returns [`StoreError::EmptyAggregate`] when the stream has no rows and
/// [`StoreError::Decode`] when a row's value is missing or not a number.
pub async fn average<S>(stream: S, column: &str) -> Result<f64>
where
    S: Stream<Item = Result<Record>>,
{
    aggregate_by(stream, |row: &Record| row.number(column))
        .await?
        .mean(column)
}

/// Mean of an already-numeric stream, such as [`crate::users::stream_user_ages`]
pub async fn average_by<S>(stream: S, label: &str) -> Result<f64>
where
    S: Stream<Item = Result<f64>>,
{
    aggregate_by(stream, |x: &f64| Ok(*x)).await?.mean(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ages(values: &[i64]) -> impl Stream<Item = Result<Record>> {
        let rows: Vec<_> = values
            .iter()
            .map(|&age| Ok(Record::new().with("name", "x").with("age", age)))
            .collect();
        stream::iter(rows)
    }

    #[tokio::test]
    async fn test_average_of_ages() {
        assert_eq!(average(ages(&[20, 30, 40]), "age").await.unwrap(), 30.0);
    }

    #[tokio::test]
    async fn test_empty_stream_is_an_error() {
        let err = average(ages(&[]), "age").await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyAggregate { ref column } if column == "age"));
    }

    #[tokio::test]
    async fn test_non_numeric_row_fails() {
        let rows = stream::iter(vec![
            Ok(Record::new().with("age", 20i64)),
            Ok(Record::new().with("age", "unknown")),
        ]);
        assert!(matches!(
            average(rows, "age").await,
            Err(StoreError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_min_max_tracked() {
        let values = stream::iter(vec![Ok(3.0), Ok(-1.5), Ok(8.0)]);
        let state = aggregate_by(values, |x: &f64| Ok(*x)).await.unwrap();
        assert_eq!(state.count, 3);
        assert_eq!(state.min, Some(-1.5));
        assert_eq!(state.max, Some(8.0));
        assert_eq!(state.mean("x").unwrap(), 9.5 / 3.0);
    }

    #[tokio::test]
    async fn test_average_by_numbers() {
        let values = stream::iter(vec![Ok(20.0), Ok(30.0), Ok(40.0)]);
        assert_eq!(average_by(values, "age").await.unwrap(), 30.0);
    }

    #[test]
    fn test_push_leaves_snapshot_untouched() {
        let before = AggregateState::EMPTY.push(10.0);
        let after = before.push(20.0);
        assert_eq!(before.count, 1);
        assert_eq!(after.count, 2);
        assert_eq!(after.sum, 30.0);
    }
}

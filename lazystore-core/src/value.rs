//! Typed row records.
//!
//! SQLite is dynamically typed, so every cell is decoded by its storage class
//! at read time into a [`Value`]. A [`Record`] keeps columns in query order.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::{Result, StoreError};

/// One cell of a row
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the cell; text is parsed so decimal columns stored as
    /// text still aggregate.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Real(x) => Some(*x),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Canonical rendering, used for cache keys and query logs.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(x) => write!(f, "{x:?}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A row: column name to value, in the order the query selected them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and fixtures
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Text column, or a decode error naming the column
    pub fn text(&self, column: &str) -> Result<&str> {
        match self.get(column) {
            Some(Value::Text(s)) => Ok(s),
            Some(other) => Err(StoreError::decode(column, format!("expected text, found {other}"))),
            None => Err(StoreError::decode(column, "column not present")),
        }
    }

    /// Numeric column, or a decode error naming the column
    pub fn number(&self, column: &str) -> Result<f64> {
        let value = self
            .get(column)
            .ok_or_else(|| StoreError::decode(column, "column not present"))?;
        value
            .as_f64()
            .ok_or_else(|| StoreError::decode(column, format!("expected a number, found {value}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Decode every column of a driver row by its storage class
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let mut record = Record::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let name = column.name();
            let raw = row
                .try_get_raw(idx)
                .map_err(|e| StoreError::decode(name, e.to_string()))?;

            let value = if raw.is_null() {
                Value::Null
            } else {
                let storage = raw.type_info().name().to_owned();
                match storage.as_str() {
                    "INTEGER" | "BOOLEAN" => Value::Integer(
                        row.try_get_unchecked::<i64, _>(idx)
                            .map_err(|e| StoreError::decode(name, e.to_string()))?,
                    ),
                    "REAL" | "NUMERIC" => Value::Real(
                        row.try_get_unchecked::<f64, _>(idx)
                            .map_err(|e| StoreError::decode(name, e.to_string()))?,
                    ),
                    "TEXT" => Value::Text(
                        row.try_get_unchecked::<String, _>(idx)
                            .map_err(|e| StoreError::decode(name, e.to_string()))?,
                    ),
                    other => {
                        return Err(StoreError::decode(
                            name,
                            format!("unsupported storage class {other}"),
                        ))
                    }
                }
            };
            record.push(name, value);
        }
        Ok(record)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Integer(30).as_f64(), Some(30.0));
        assert_eq!(Value::Real(29.5).as_f64(), Some(29.5));
        assert_eq!(Value::from(" 41 ").as_f64(), Some(41.0));
        assert_eq!(Value::from("forty").as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn test_canonical_display() {
        assert_eq!(Value::from("a\"b").to_string(), r#""a\"b""#);
        assert_eq!(Value::Integer(7).to_string(), "7");
        assert_eq!(Value::Real(7.0).to_string(), "7.0");
        assert_eq!(Value::from(None::<i64>).to_string(), "NULL");
    }

    #[test]
    fn test_record_accessors() {
        let record = Record::new()
            .with("user_id", "9f1c")
            .with("name", "Alice Smith")
            .with("age", 30i64);

        assert_eq!(record.len(), 3);
        assert_eq!(record.text("name").unwrap(), "Alice Smith");
        assert_eq!(record.number("age").unwrap(), 30.0);

        let err = record.number("name").unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
        assert!(record.text("email").is_err());
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let record = Record::new().with("b", 1i64).with("a", "x");
        let encoded = serde_json::to_string(&record).unwrap();
        assert_eq!(encoded, r#"{"b":1,"a":"x"}"#);
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"a": "x", "b": 1}));
    }
}

//! Driver-native row representation.
//!
//! Database drivers hand back loosely typed values; the same logical column
//! can arrive as text in one batch and as a structured value in the next.
//! [`DriverValue`] is the closed set of shapes the coercion engine accepts.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Owned byte sequence
    Bytes(Vec<u8>),
    /// View into a fetch buffer owned by the driver, valid for one fetch only
    ByteView(Bytes),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(serde_json::Value),
}

impl DriverValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DriverValue::Null)
    }

    /// Short name of the variant, used in coercion error messages
    pub fn kind(&self) -> &'static str {
        match self {
            DriverValue::Null => "null",
            DriverValue::Bool(_) => "bool",
            DriverValue::Int(_) => "integer",
            DriverValue::Float(_) => "float",
            DriverValue::Text(_) => "text",
            DriverValue::Bytes(_) => "bytes",
            DriverValue::ByteView(_) => "byte view",
            DriverValue::Timestamp(_) => "timestamp",
            DriverValue::TimestampTz(_) => "timestamptz",
            DriverValue::Json(_) => "json",
        }
    }
}

impl From<serde_json::Value> for DriverValue {
    /// Maps a decoded JSON document field onto the driver value it stands for.
    /// Objects and arrays stay structured; everything else becomes a scalar.
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => DriverValue::Null,
            Value::Bool(b) => DriverValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => DriverValue::Int(i),
                None => match n.as_f64() {
                    Some(f) => DriverValue::Float(f),
                    None => DriverValue::Json(Value::Number(n)),
                },
            },
            Value::String(s) => DriverValue::Text(s),
            other @ (Value::Array(_) | Value::Object(_)) => DriverValue::Json(other),
        }
    }
}

/// One row: column name to value, in the order the driver returned them
pub type Row = IndexMap<String, DriverValue>;

/// A bounded batch of rows from one cursor fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    rows: Vec<Row>,
}

impl RowBatch {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl From<Vec<Row>> for RowBatch {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

// Type coercion engine
//
// Converts a batch of driver rows into an Arrow RecordBatch whose schema is
// exactly the table's declared physical schema. Every logical type has one
// total conversion function; a value that cannot be converted is an error,
// never a silently inferred type.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Int32Builder, Int64Builder, RecordBatch,
    StringBuilder, TimestampNanosecondBuilder,
};
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::error::{ExportError, Result};
use crate::schema::{ColumnSpec, LogicalType, TableSchema};
use crate::value::{DriverValue, Row, RowBatch};

/// A batch whose columns match the table's physical schema exactly
pub type CoercedBatch = RecordBatch;

static NULL: DriverValue = DriverValue::Null;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Coerce a fetched batch against its table schema.
///
/// Takes the batch by value: the driver rows are consumed here and nothing
/// derived from them (in particular byte views into fetch buffers) survives
/// past this call except through owned Arrow buffers.
pub fn coerce(batch: RowBatch, table: &TableSchema) -> Result<CoercedBatch> {
    let rows = batch.into_rows();
    check_declared_columns(&rows, table)?;

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns.len());
    for spec in &table.columns {
        let array = coerce_column(&rows, spec)
            .map_err(|reason| ExportError::coercion(&table.name, &spec.name, reason))?;
        arrays.push(array);
    }

    RecordBatch::try_new(table.arrow_schema(), arrays).map_err(|e| ExportError::SchemaMismatch {
        path: table.name.clone(),
        reason: e.to_string(),
    })
}

/// Serialize a semi-structured value to its canonical text form.
///
/// Compact output, object keys in their original order, JSON literal
/// spellings (`true`, `false`, `null`).
pub fn canonical_json(value: &Value) -> std::result::Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

fn check_declared_columns(rows: &[Row], table: &TableSchema) -> Result<()> {
    let declared: HashSet<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    for row in rows {
        if let Some(name) = row.keys().find(|k| !declared.contains(k.as_str())) {
            return Err(ExportError::coercion(
                &table.name,
                name,
                "column is not declared in the schema registry",
            ));
        }
    }
    Ok(())
}

fn coerce_column(rows: &[Row], spec: &ColumnSpec) -> std::result::Result<ArrayRef, String> {
    let values = rows
        .iter()
        .map(|row| row.get(&spec.name).unwrap_or(&NULL))
        .enumerate();

    let array: ArrayRef = match spec.logical_type {
        LogicalType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for (idx, value) in values {
                builder.append_option(to_bool(value).map_err(|e| at_row(idx, e))?);
            }
            Arc::new(builder.finish())
        }
        LogicalType::Int32 => {
            let mut builder = Int32Builder::with_capacity(rows.len());
            for (idx, value) in values {
                builder.append_option(to_i32(value).map_err(|e| at_row(idx, e))?);
            }
            Arc::new(builder.finish())
        }
        LogicalType::Int64 => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for (idx, value) in values {
                builder.append_option(to_i64(value).map_err(|e| at_row(idx, e))?);
            }
            Arc::new(builder.finish())
        }
        LogicalType::Utf8 => {
            let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 16);
            for (idx, value) in values {
                builder.append_option(to_utf8(value).map_err(|e| at_row(idx, e))?);
            }
            Arc::new(builder.finish())
        }
        LogicalType::Binary => {
            let mut builder = BinaryBuilder::with_capacity(rows.len(), rows.len() * 32);
            for (idx, value) in values {
                builder.append_option(to_binary(value).map_err(|e| at_row(idx, e))?);
            }
            Arc::new(builder.finish())
        }
        LogicalType::Timestamp => {
            let mut builder = TimestampNanosecondBuilder::with_capacity(rows.len());
            for (idx, value) in values {
                builder.append_option(to_timestamp_nanos(value).map_err(|e| at_row(idx, e))?);
            }
            Arc::new(builder.finish())
        }
        LogicalType::Json => {
            let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 64);
            for (idx, value) in values {
                builder.append_option(to_json_text(value).map_err(|e| at_row(idx, e))?);
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

fn at_row(idx: usize, reason: String) -> String {
    format!("row {}: {}", idx, reason)
}

fn unsupported(value: &DriverValue, target: LogicalType) -> String {
    format!("cannot convert {} to {}", value.kind(), target)
}

fn to_bool(value: &DriverValue) -> std::result::Result<Option<bool>, String> {
    match value {
        DriverValue::Null => Ok(None),
        DriverValue::Bool(b) => Ok(Some(*b)),
        DriverValue::Int(0) => Ok(Some(false)),
        DriverValue::Int(1) => Ok(Some(true)),
        DriverValue::Json(Value::Bool(b)) => Ok(Some(*b)),
        DriverValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Some(true)),
            "false" | "f" | "0" => Ok(Some(false)),
            _ => Err(format!("cannot parse '{}' as boolean", s)),
        },
        other => Err(unsupported(other, LogicalType::Boolean)),
    }
}

fn to_i64(value: &DriverValue) -> std::result::Result<Option<i64>, String> {
    match value {
        DriverValue::Null => Ok(None),
        DriverValue::Int(i) => Ok(Some(*i)),
        DriverValue::Float(f) => float_to_i64(*f).map(Some),
        DriverValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| format!("cannot parse '{}' as integer: {}", s, e)),
        DriverValue::Json(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("json number {} is not an int64", n)),
        other => Err(unsupported(other, LogicalType::Int64)),
    }
}

fn float_to_i64(f: f64) -> std::result::Result<i64, String> {
    // i64::MAX is not exactly representable; 2^63 is the first float past it.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT {
        Ok(f as i64)
    } else {
        Err(format!("float {} has no exact integer value", f))
    }
}

fn to_i32(value: &DriverValue) -> std::result::Result<Option<i32>, String> {
    match value {
        DriverValue::Null
        | DriverValue::Int(_)
        | DriverValue::Float(_)
        | DriverValue::Text(_)
        | DriverValue::Json(Value::Number(_)) => match to_i64(value)? {
            Some(i) => i32::try_from(i)
                .map(Some)
                .map_err(|_| format!("{} is out of range for int32", i)),
            None => Ok(None),
        },
        other => Err(unsupported(other, LogicalType::Int32)),
    }
}

fn to_utf8(value: &DriverValue) -> std::result::Result<Option<Cow<'_, str>>, String> {
    match value {
        DriverValue::Null => Ok(None),
        DriverValue::Text(s) => Ok(Some(Cow::Borrowed(s.as_str()))),
        DriverValue::Bool(b) => Ok(Some(Cow::Borrowed(if *b { "true" } else { "false" }))),
        DriverValue::Int(i) => Ok(Some(Cow::Owned(i.to_string()))),
        DriverValue::Float(f) => Ok(Some(Cow::Owned(f.to_string()))),
        DriverValue::Timestamp(ts) => Ok(Some(Cow::Owned(
            ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        ))),
        DriverValue::TimestampTz(ts) => Ok(Some(Cow::Owned(ts.to_rfc3339()))),
        DriverValue::Json(Value::String(s)) => Ok(Some(Cow::Borrowed(s.as_str()))),
        DriverValue::Json(v) => canonical_json(v)
            .map(|s| Some(Cow::Owned(s)))
            .map_err(|e| e.to_string()),
        other => Err(unsupported(other, LogicalType::Utf8)),
    }
}

fn to_binary(value: &DriverValue) -> std::result::Result<Option<Cow<'_, [u8]>>, String> {
    match value {
        DriverValue::Null => Ok(None),
        DriverValue::Bytes(b) => Ok(Some(Cow::Borrowed(b.as_slice()))),
        // The view points into the driver's fetch buffer; take a durable copy.
        DriverValue::ByteView(view) => Ok(Some(Cow::Owned(view.to_vec()))),
        DriverValue::Text(s) => match s.strip_prefix("\\x") {
            Some(hex_digits) => hex::decode(hex_digits)
                .map(|b| Some(Cow::Owned(b)))
                .map_err(|e| format!("invalid bytea hex literal: {}", e)),
            None => Ok(Some(Cow::Borrowed(s.as_bytes()))),
        },
        other => Err(unsupported(other, LogicalType::Binary)),
    }
}

fn to_timestamp_nanos(value: &DriverValue) -> std::result::Result<Option<i64>, String> {
    match value {
        DriverValue::Null => Ok(None),
        DriverValue::Timestamp(ts) => naive_to_nanos(ts).map(Some),
        // Offset-aware values are stored as naive UTC.
        DriverValue::TimestampTz(ts) => naive_to_nanos(&ts.naive_utc()).map(Some),
        DriverValue::Int(nanos) => Ok(Some(*nanos)),
        DriverValue::Text(s) => parse_timestamp(s).and_then(|ts| naive_to_nanos(&ts)).map(Some),
        other => Err(unsupported(other, LogicalType::Timestamp)),
    }
}

fn naive_to_nanos(ts: &NaiveDateTime) -> std::result::Result<i64, String> {
    ts.and_utc()
        .timestamp_nanos_opt()
        .ok_or_else(|| format!("timestamp {} is out of nanosecond range", ts))
}

/// Parse timestamp text into naive UTC
fn parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    // PostgreSQL timestamptz output, e.g. "2024-01-15 14:30:00.5+00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(dt.naive_utc());
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts);
        }
    }
    Err(format!("cannot parse '{}' as timestamp", s))
}

fn to_json_text(value: &DriverValue) -> std::result::Result<Option<String>, String> {
    let parsed;
    let json = match value {
        DriverValue::Null => return Ok(None),
        DriverValue::Json(v) => v,
        DriverValue::Text(s) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|e| format!("text is not valid JSON: {}", e))?;
            &parsed
        }
        DriverValue::Bool(b) => {
            parsed = Value::Bool(*b);
            &parsed
        }
        DriverValue::Int(i) => {
            parsed = Value::from(*i);
            &parsed
        }
        DriverValue::Float(f) => {
            parsed = serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| format!("non-finite float {} has no JSON form", f))?;
            &parsed
        }
        other => return Err(unsupported(other, LogicalType::Json)),
    };
    canonical_json(json).map(Some).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::schema::ColumnSpec;
    use arrow::array::{
        Array, BinaryArray, BooleanArray, Int32Array, Int64Array, StringArray,
        TimestampNanosecondArray,
    };
    use arrow::datatypes::DataType;
    use bytes::Bytes;
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use serde_json::json;

    fn table() -> TableSchema {
        TableSchema::new(
            "verified",
            vec![
                ColumnSpec::new("id", LogicalType::Int64),
                ColumnSpec::new("idx", LogicalType::Int32),
                ColumnSpec::new("matched", LogicalType::Boolean),
                ColumnSpec::new("name", LogicalType::Utf8),
                ColumnSpec::new("hash", LogicalType::Binary),
                ColumnSpec::new("created_at", LogicalType::Timestamp),
                ColumnSpec::new("values", LogicalType::Json),
            ],
            4,
            2,
        )
    }

    fn row(values: Vec<(&str, DriverValue)>) -> Row {
        values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn naive(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, 30, 0)
            .unwrap()
    }

    /// Rebuild driver rows from a coerced batch, the way a driver would
    /// return the already-normalized values.
    fn rows_from_batch(batch: &RecordBatch) -> Vec<Row> {
        let schema = batch.schema();
        (0..batch.num_rows())
            .map(|i| {
                schema
                    .fields()
                    .iter()
                    .enumerate()
                    .map(|(c, field)| {
                        let col = batch.column(c);
                        let value = if col.is_null(i) {
                            DriverValue::Null
                        } else {
                            match field.data_type() {
                                DataType::Boolean => DriverValue::Bool(
                                    col.as_any().downcast_ref::<BooleanArray>().unwrap().value(i),
                                ),
                                DataType::Int32 => DriverValue::Int(
                                    col.as_any().downcast_ref::<Int32Array>().unwrap().value(i)
                                        as i64,
                                ),
                                DataType::Int64 => DriverValue::Int(
                                    col.as_any().downcast_ref::<Int64Array>().unwrap().value(i),
                                ),
                                DataType::Utf8 => DriverValue::Text(
                                    col.as_any()
                                        .downcast_ref::<StringArray>()
                                        .unwrap()
                                        .value(i)
                                        .to_string(),
                                ),
                                DataType::Binary => DriverValue::Bytes(
                                    col.as_any()
                                        .downcast_ref::<BinaryArray>()
                                        .unwrap()
                                        .value(i)
                                        .to_vec(),
                                ),
                                DataType::Timestamp(_, _) => {
                                    let nanos = col
                                        .as_any()
                                        .downcast_ref::<TimestampNanosecondArray>()
                                        .unwrap()
                                        .value(i);
                                    DriverValue::Timestamp(
                                        DateTime::from_timestamp_nanos(nanos).naive_utc(),
                                    )
                                }
                                other => panic!("unexpected type {other}"),
                            }
                        };
                        (field.name().clone(), value)
                    })
                    .collect()
            })
            .collect()
    }

    fn mixed_batch() -> RowBatch {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        RowBatch::new(vec![
            row(vec![
                ("id", DriverValue::Int(1)),
                ("idx", DriverValue::Int(7)),
                ("matched", DriverValue::Bool(true)),
                ("name", DriverValue::Text("alpha".into())),
                ("hash", DriverValue::ByteView(Bytes::from_static(&[0xde, 0xad]))),
                ("created_at", DriverValue::Timestamp(naive(14))),
                (
                    "values",
                    DriverValue::Json(json!({"b": true, "a": [1, null], "z": {"k": false}})),
                ),
            ]),
            row(vec![
                ("id", DriverValue::Text("2".into())),
                ("idx", DriverValue::Float(3.0)),
                ("matched", DriverValue::Text("f".into())),
                ("name", DriverValue::Null),
                ("hash", DriverValue::Text("\\xbeef".into())),
                (
                    "created_at",
                    DriverValue::TimestampTz(offset.from_local_datetime(&naive(16)).single().unwrap()),
                ),
                ("values", DriverValue::Text("{ \"x\" : 1 }".into())),
            ]),
            // Missing columns become nulls.
            row(vec![("id", DriverValue::Int(3))]),
        ])
    }

    #[test]
    fn coerces_heterogeneous_values_to_declared_schema() {
        let table = table();
        let batch = coerce(mixed_batch(), &table).unwrap();

        assert_eq!(batch.schema(), table.arrow_schema());
        assert_eq!(batch.num_rows(), 3);

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values().to_vec(), vec![1, 2, 3]);

        let idx = batch.column(1).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(idx.value(1), 3);
        assert!(idx.is_null(2));

        let matched = batch.column(2).as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(matched.value(0));
        assert!(!matched.value(1));

        let hashes = batch.column(4).as_any().downcast_ref::<BinaryArray>().unwrap();
        assert_eq!(hashes.value(0), &[0xde, 0xad]);
        assert_eq!(hashes.value(1), &[0xbe, 0xef]);
    }

    #[test]
    fn offset_aware_timestamps_become_naive_utc() {
        let batch = coerce(mixed_batch(), &table()).unwrap();
        let ts = batch
            .column(5)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        // 16:30+02:00 is 14:30 UTC, same instant as the naive value in row 0
        assert_eq!(ts.value(0), ts.value(1));
        assert_eq!(
            batch.schema().field(5).data_type(),
            &DataType::Timestamp(arrow::datatypes::TimeUnit::Nanosecond, None)
        );
    }

    #[test]
    fn json_is_serialized_canonically() {
        let batch = coerce(mixed_batch(), &table()).unwrap();
        let values = batch.column(6).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(
            values.value(0),
            r#"{"b":true,"a":[1,null],"z":{"k":false}}"#
        );
        assert_eq!(values.value(1), r#"{"x":1}"#);
        assert!(values.is_null(2));
    }

    #[test]
    fn semi_structured_text_round_trips() {
        let original = json!({"zeta": 1, "alpha": {"on": true, "off": false}, "list": ["a", 2.5]});
        let table = TableSchema::new(
            "t",
            vec![ColumnSpec::new("doc", LogicalType::Json)],
            1,
            1,
        );
        let batch = coerce(
            RowBatch::new(vec![row(vec![("doc", DriverValue::Json(original.clone()))])]),
            &table,
        )
        .unwrap();
        let text = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .value(0)
            .to_string();

        let reparsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed, original);
        let keys: Vec<_> = reparsed.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "list"]);
        assert!(text.contains("true") && text.contains("false"));
        assert!(!text.contains("True") && !text.contains(' '));
    }

    #[test]
    fn coercion_is_a_fixed_point() {
        let table = table();
        let first = coerce(mixed_batch(), &table).unwrap();
        let second = coerce(RowBatch::new(rows_from_batch(&first)), &table).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn uncastable_value_reports_column() {
        let batch = RowBatch::new(vec![row(vec![("idx", DriverValue::Text("seven".into()))])]);
        let err = coerce(batch, &table()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::E102TypeCoercion);
        match err {
            ExportError::TypeCoercion { column, reason, .. } => {
                assert_eq!(column, "idx");
                assert!(reason.starts_with("row 0"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn int32_overflow_is_rejected() {
        let batch = RowBatch::new(vec![row(vec![("idx", DriverValue::Int(i64::from(i32::MAX) + 1))])]);
        assert!(coerce(batch, &table()).is_err());
    }

    #[test]
    fn bytes_into_text_column_is_rejected() {
        let batch = RowBatch::new(vec![row(vec![("name", DriverValue::Bytes(vec![1, 2]))])]);
        let err = coerce(batch, &table()).unwrap_err();
        assert!(err.to_string().contains("cannot convert bytes to utf8"));
    }

    #[test]
    fn invalid_json_text_is_rejected() {
        let batch = RowBatch::new(vec![row(vec![("values", DriverValue::Text("{nope".into()))])]);
        assert!(coerce(batch, &table()).is_err());
    }

    #[test]
    fn undeclared_column_is_rejected() {
        let batch = RowBatch::new(vec![row(vec![
            ("id", DriverValue::Int(1)),
            ("surprise", DriverValue::Int(2)),
        ])]);
        let err = coerce(batch, &table()).unwrap_err();
        assert!(matches!(err, ExportError::TypeCoercion { ref column, .. } if column == "surprise"));
    }

    #[test]
    fn empty_batch_has_schema_and_no_rows() {
        let table = table();
        let batch = coerce(RowBatch::default(), &table).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), table.arrow_schema());
    }

    #[test]
    fn timestamp_text_formats() {
        assert_eq!(parse_timestamp("2024-01-15T14:30:00").unwrap(), naive(14));
        assert_eq!(parse_timestamp("2024-01-15 14:30:00.000").unwrap(), naive(14));
        assert_eq!(parse_timestamp("2024-01-15T16:30:00+02:00").unwrap(), naive(14));
        assert_eq!(parse_timestamp("2024-01-15 14:30:00+00").unwrap(), naive(14));
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn float_to_int_requires_exact_value() {
        assert_eq!(float_to_i64(42.0).unwrap(), 42);
        assert!(float_to_i64(1.5).is_err());
        assert!(float_to_i64(f64::NAN).is_err());
        assert!(float_to_i64(1e19).is_err());
    }
}

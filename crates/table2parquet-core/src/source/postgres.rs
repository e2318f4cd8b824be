// PostgreSQL table scans
//
// Each scan opens its own connection and a read-only transaction holding a
// server-side cursor (`DECLARE ... NO SCROLL CURSOR FOR SELECT * FROM <table>
// [OFFSET n]`) that is drained with `FETCH FORWARD <max_rows>`. Only one
// fetch worth of rows is ever held client-side.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls};

use super::{CursorError, RowCursor, TableSource};
use crate::schema::TableSchema;
use crate::value::{DriverValue, Row, RowBatch};

const CURSOR_NAME: &str = "table2parquet_scan";

type DecodeError = Box<dyn std::error::Error + Sync + Send>;

#[derive(Clone)]
pub struct PostgresSource {
    config: Config,
    schema: Option<String>,
}

impl fmt::Debug for PostgresSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSource")
            .field("dbname", &self.config.get_dbname())
            .field("schema", &self.schema)
            .finish()
    }
}

impl PostgresSource {
    /// Parse a libpq-style connection string (`postgres://...` or
    /// `host=... user=...`). No connection is opened until a scan starts.
    pub fn new(connection_string: &str) -> Result<Self, CursorError> {
        let config = connection_string
            .parse::<Config>()
            .map_err(|e| CursorError::InvalidConnection {
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            schema: None,
        })
    }

    /// Qualify scanned tables with `schema` instead of relying on search_path
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn scan_query(&self, table: &str, row_offset: Option<u64>) -> String {
        let relation = match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
            None => quote_ident(table),
        };
        match row_offset {
            Some(offset) if offset > 0 => format!("SELECT * FROM {} OFFSET {}", relation, offset),
            _ => format!("SELECT * FROM {}", relation),
        }
    }
}

#[async_trait]
impl TableSource for PostgresSource {
    async fn scan(
        &self,
        table: &TableSchema,
        row_offset: Option<u64>,
    ) -> Result<Box<dyn RowCursor>, CursorError> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| connection_error(&table.name, e))?;

        let table_name = table.name.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(table = %table_name, error = %e, "Database connection failed");
            }
        });

        let query = self.scan_query(&table.name, row_offset);
        tracing::debug!(table = %table.name, query = %query, "Declaring server-side cursor");
        client
            .batch_execute(&format!(
                "BEGIN READ ONLY; DECLARE {} NO SCROLL CURSOR FOR {}",
                CURSOR_NAME, query
            ))
            .await
            .map_err(|e| connection_error(&table.name, e))?;

        Ok(Box::new(PostgresCursor {
            table: table.name.clone(),
            client,
            row_number: 0,
            exhausted: false,
        }))
    }
}

struct PostgresCursor {
    table: String,
    client: Client,
    row_number: u64,
    exhausted: bool,
}

#[async_trait]
impl RowCursor for PostgresCursor {
    async fn fetch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, CursorError> {
        if self.exhausted {
            return Ok(None);
        }

        let rows = self
            .client
            .query(
                &format!("FETCH FORWARD {} FROM {}", max_rows, CURSOR_NAME),
                &[],
            )
            .await
            .map_err(|e| connection_error(&self.table, e))?;

        if rows.is_empty() {
            self.exhausted = true;
            self.client
                .batch_execute(&format!("CLOSE {}; COMMIT", CURSOR_NAME))
                .await
                .map_err(|e| connection_error(&self.table, e))?;
            return Ok(None);
        }

        let mut batch = Vec::with_capacity(rows.len());
        for row in &rows {
            self.row_number += 1;
            let decoded = decode_row(row).map_err(|reason| CursorError::Decode {
                table: self.table.clone(),
                row: self.row_number,
                reason,
            })?;
            batch.push(decoded);
        }
        Ok(Some(RowBatch::new(batch)))
    }
}

fn connection_error(table: &str, err: tokio_postgres::Error) -> CursorError {
    CursorError::Connection {
        table: table.to_string(),
        reason: err.to_string(),
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, String> {
    let mut decoded = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let PgValue(value) = row
            .try_get::<_, PgValue>(idx)
            .map_err(|e| format!("column '{}': {}", column.name(), e))?;
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

/// Binary wire value of any column type, mapped onto [`DriverValue`]
struct PgValue(DriverValue);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, DecodeError> {
        decode_value(ty, raw).map(PgValue)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, DecodeError> {
        Ok(PgValue(DriverValue::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn decode_value(ty: &Type, raw: &[u8]) -> Result<DriverValue, DecodeError> {
    let value = match *ty {
        Type::BOOL => DriverValue::Bool(bool::from_sql(ty, raw)?),
        Type::INT2 => DriverValue::Int(i16::from_sql(ty, raw)?.into()),
        Type::INT4 => DriverValue::Int(i32::from_sql(ty, raw)?.into()),
        Type::INT8 => DriverValue::Int(i64::from_sql(ty, raw)?),
        Type::OID => DriverValue::Int(u32::from_sql(ty, raw)?.into()),
        Type::FLOAT4 => DriverValue::Float(f32::from_sql(ty, raw)?.into()),
        Type::FLOAT8 => DriverValue::Float(f64::from_sql(ty, raw)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            DriverValue::Text(String::from_sql(ty, raw)?)
        }
        Type::BYTEA => DriverValue::ByteView(Bytes::copy_from_slice(raw)),
        Type::TIMESTAMP => DriverValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
        Type::TIMESTAMPTZ => DriverValue::TimestampTz(DateTime::<FixedOffset>::from_sql(ty, raw)?),
        Type::JSON | Type::JSONB => DriverValue::Json(serde_json::Value::from_sql(ty, raw)?),
        Type::UUID => DriverValue::Text(format_uuid(raw)?),
        _ => return Err(format!("unsupported column type '{}'", ty).into()),
    };
    Ok(value)
}

fn format_uuid(raw: &[u8]) -> Result<String, DecodeError> {
    if raw.len() != 16 {
        return Err(format!("uuid must be 16 bytes, got {}", raw.len()).into());
    }
    let digits = hex::encode(raw);
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &digits[0..8],
        &digits[8..12],
        &digits[12..16],
        &digits[16..20],
        &digits[20..32]
    ))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

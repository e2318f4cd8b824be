// Newline-delimited JSON table dumps
//
// Reads `<dir>/<table>.ndjson`, one JSON object per line, streaming line by
// line so memory stays bounded by the fetch size. Values map onto
// DriverValue the way a driver's text protocol would present them: objects
// and arrays stay structured, everything else is a scalar.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::{CursorError, RowCursor, TableSource};
use crate::schema::TableSchema;
use crate::value::{DriverValue, Row, RowBatch};

#[derive(Debug, Clone)]
pub struct NdjsonSource {
    dir: PathBuf,
}

impl NdjsonSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.ndjson", table))
    }
}

#[async_trait]
impl TableSource for NdjsonSource {
    async fn scan(
        &self,
        table: &TableSchema,
        row_offset: Option<u64>,
    ) -> Result<Box<dyn RowCursor>, CursorError> {
        let path = self.table_path(&table.name);
        let file = File::open(&path).await.map_err(|source| CursorError::Io {
            table: table.name.clone(),
            source,
        })?;

        tracing::debug!(table = %table.name, path = %path.display(), offset = ?row_offset, "Opened NDJSON scan");

        Ok(Box::new(NdjsonCursor {
            table: table.name.clone(),
            lines: BufReader::new(file).lines(),
            skip: row_offset.unwrap_or(0),
            row_number: 0,
        }))
    }
}

struct NdjsonCursor {
    table: String,
    lines: Lines<BufReader<File>>,
    skip: u64,
    row_number: u64,
}

impl NdjsonCursor {
    async fn next_row(&mut self) -> Result<Option<Row>, CursorError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|source| CursorError::Io {
                    table: self.table.clone(),
                    source,
                })?;
            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }

            let row_number = self.row_number;
            self.row_number += 1;
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            return self.decode(&line, row_number).map(Some);
        }
    }

    fn decode(&self, line: &str, row: u64) -> Result<Row, CursorError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| CursorError::Decode {
                table: self.table.clone(),
                row,
                reason: e.to_string(),
            })?;
        let serde_json::Value::Object(object) = value else {
            return Err(CursorError::Decode {
                table: self.table.clone(),
                row,
                reason: "expected a JSON object per line".to_string(),
            });
        };
        Ok(object
            .into_iter()
            .map(|(column, value)| (column, DriverValue::from(value)))
            .collect())
    }
}

#[async_trait]
impl RowCursor for NdjsonCursor {
    async fn fetch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, CursorError> {
        let mut rows = Vec::with_capacity(max_rows.min(64 * 1024));
        while rows.len() < max_rows.max(1) {
            match self.next_row().await? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(RowBatch::new(rows)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, LogicalType};

    fn table() -> TableSchema {
        TableSchema::new(
            "events",
            vec![
                ColumnSpec::new("id", LogicalType::Int64),
                ColumnSpec::new("doc", LogicalType::Json),
            ],
            2,
            2,
        )
    }

    fn write_dump(dir: &std::path::Path, lines: &[&str]) {
        std::fs::write(dir.join("events.ndjson"), lines.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn streams_rows_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        write_dump(
            dir.path(),
            &[
                r#"{"id": 1, "doc": {"a": true}}"#,
                "",
                r#"{"id": 2, "doc": null}"#,
                r#"{"id": 3, "doc": [1, 2]}"#,
            ],
        );

        let source = NdjsonSource::new(dir.path());
        let mut cursor = source.scan(&table(), None).await.unwrap();

        let first = cursor.fetch(2).await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert!(matches!(first.rows()[0]["doc"], DriverValue::Json(_)));
        assert_eq!(first.rows()[1]["doc"], DriverValue::Null);

        let second = cursor.fetch(2).await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(cursor.fetch(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offset_skips_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_dump(dir.path(), &[r#"{"id": 1}"#, r#"{"id": 2}"#, r#"{"id": 3}"#]);

        let source = NdjsonSource::new(dir.path());
        let mut cursor = source.scan(&table(), Some(2)).await.unwrap();
        let batch = cursor.fetch(10).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows()[0]["id"], DriverValue::Int(3));
    }

    #[tokio::test]
    async fn missing_dump_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = NdjsonSource::new(dir.path());
        let err = source.scan(&table(), None).await.err().unwrap();
        assert!(matches!(err, CursorError::Io { .. }));
    }

    #[tokio::test]
    async fn malformed_line_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        write_dump(dir.path(), &[r#"{"id": 1}"#, "[1, 2]"]);

        let source = NdjsonSource::new(dir.path());
        let mut cursor = source.scan(&table(), None).await.unwrap();
        let err = cursor.fetch(10).await.unwrap_err();
        assert!(matches!(err, CursorError::Decode { row: 1, .. }));
    }
}

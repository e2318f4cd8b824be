// In-memory table source
//
// Serves pre-loaded rows in fixed-size fetches. Used for tests and for
// embedding the pipeline where rows are already materialized elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{CursorError, RowCursor, TableSource};
use crate::schema::TableSchema;
use crate::value::{Row, RowBatch};

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: HashMap<String, Arc<Vec<Row>>>,
    /// Simulated connection loss once this many rows have been served
    failures: HashMap<String, u64>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(name.into(), Arc::new(rows));
        self
    }

    pub fn with_failure_after(mut self, name: impl Into<String>, rows: u64) -> Self {
        self.failures.insert(name.into(), rows);
        self
    }
}

#[async_trait]
impl TableSource for MemorySource {
    async fn scan(
        &self,
        table: &TableSchema,
        row_offset: Option<u64>,
    ) -> Result<Box<dyn RowCursor>, CursorError> {
        let rows = self.tables.get(&table.name).cloned().unwrap_or_default();
        let start = usize::try_from(row_offset.unwrap_or(0))
            .unwrap_or(usize::MAX)
            .min(rows.len());

        Ok(Box::new(MemoryCursor {
            table: table.name.clone(),
            rows,
            position: start,
            served: 0,
            fail_after: self.failures.get(&table.name).copied(),
        }))
    }
}

struct MemoryCursor {
    table: String,
    rows: Arc<Vec<Row>>,
    position: usize,
    served: u64,
    fail_after: Option<u64>,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    async fn fetch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, CursorError> {
        if let Some(limit) = self.fail_after {
            if self.served >= limit {
                return Err(CursorError::Connection {
                    table: self.table.clone(),
                    reason: format!("simulated failure after {} rows", limit),
                });
            }
        }

        if self.position >= self.rows.len() {
            return Ok(None);
        }
        let end = self.position.saturating_add(max_rows.max(1)).min(self.rows.len());
        let batch: Vec<Row> = self.rows[self.position..end].to_vec();
        self.served += batch.len() as u64;
        self.position = end;
        Ok(Some(RowBatch::new(batch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, LogicalType};
    use crate::value::DriverValue;

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| Row::from([("id".to_string(), DriverValue::Int(i))]))
            .collect()
    }

    fn table() -> TableSchema {
        TableSchema::new("t", vec![ColumnSpec::new("id", LogicalType::Int64)], 4, 2)
    }

    #[tokio::test]
    async fn fetches_bounded_batches_until_exhausted() {
        let source = MemorySource::new().with_table("t", rows(10));
        let mut cursor = source.scan(&table(), None).await.unwrap();

        let mut sizes = Vec::new();
        while let Some(batch) = cursor.fetch(4).await.unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(cursor.fetch(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offset_skips_leading_rows() {
        let source = MemorySource::new().with_table("t", rows(10));
        let mut cursor = source.scan(&table(), Some(7)).await.unwrap();
        let batch = cursor.fetch(100).await.unwrap().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.rows()[0]["id"], DriverValue::Int(7));
    }

    #[tokio::test]
    async fn unknown_table_scans_empty() {
        let source = MemorySource::new();
        let mut cursor = source.scan(&table(), None).await.unwrap();
        assert!(cursor.fetch(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn simulated_failure_surfaces_as_connection_error() {
        let source = MemorySource::new()
            .with_table("t", rows(10))
            .with_failure_after("t", 4);
        let mut cursor = source.scan(&table(), None).await.unwrap();
        assert!(cursor.fetch(4).await.unwrap().is_some());
        let err = cursor.fetch(4).await.unwrap_err();
        assert!(matches!(err, CursorError::Connection { .. }));
    }
}

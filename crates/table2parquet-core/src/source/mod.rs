//! Database cursor abstraction.
//!
//! A [`TableSource`] opens a streaming, unordered full-table scan
//! (`SELECT * FROM <table> [OFFSET n]`); the returned [`RowCursor`] yields
//! bounded batches without buffering the result set client-side.

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::TableSchema;
use crate::value::RowBatch;

mod memory;
mod ndjson;
mod postgres;

pub use memory::MemorySource;
pub use ndjson::NdjsonSource;
pub use postgres::PostgresSource;

/// Faults raised by a cursor; fatal for the table being exported
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Cursor I/O failure for table '{table}': {source}")]
    Io {
        table: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot decode row {row} of table '{table}': {reason}")]
    Decode {
        table: String,
        row: u64,
        reason: String,
    },

    #[error("Connection lost while scanning '{table}': {reason}")]
    Connection { table: String, reason: String },

    #[error("Cursor for '{table}' returned {rows} rows, more than the {max_rows} requested")]
    Overrun {
        table: String,
        rows: usize,
        max_rows: usize,
    },

    #[error("Invalid database connection string: {reason}")]
    InvalidConnection { reason: String },
}

/// Opens scans over tables
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Start a scan of `table`, skipping the first `row_offset` rows if given
    async fn scan(
        &self,
        table: &TableSchema,
        row_offset: Option<u64>,
    ) -> Result<Box<dyn RowCursor>, CursorError>;
}

/// Server-side cursor over one table scan
#[async_trait]
pub trait RowCursor: Send {
    /// Fetch up to `max_rows` rows. `None` once the scan is exhausted.
    async fn fetch(&mut self, max_rows: usize) -> Result<Option<RowBatch>, CursorError>;
}

// table2parquet-core - Table export pipeline
//
// Streams database tables through a declared schema into partitioned
// Parquet files and hands finalized files to a publication sink.
//
// Pipeline: cursor -> RowBatch -> coerce -> RecordBatch -> BatchWriter
//           -> finalized file -> PublicationSink -> ManifestRecorder

#![allow(clippy::result_large_err)]

pub mod coerce;
pub mod error;
pub mod manifest;
pub mod partition;
pub mod schema;
pub mod sink;
pub mod source;
pub mod value;
pub mod writer;

pub use coerce::{canonical_json, coerce, CoercedBatch};
pub use error::{ErrorCode, ExportError, Result};
pub use manifest::{Manifest, ManifestRecorder, MANIFEST_KEY};
pub use partition::{
    export_table, file_name, ExportOptions, OutputFile, PartitionState, Partitioner, TableExport,
    REDUCED_CHUNK_SIZE,
};
pub use schema::{ColumnSpec, Compression, LogicalType, SchemaRegistry, TableSchema};
pub use sink::{PublicationSink, PublishError};
pub use source::{
    CursorError, MemorySource, NdjsonSource, PostgresSource, RowCursor, TableSource,
};
pub use value::{DriverValue, Row, RowBatch};
pub use writer::{BatchWriter, FinishedFile, WriterOptions, DEFAULT_ROW_GROUP_SIZE};

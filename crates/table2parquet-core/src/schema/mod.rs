// Declarative table schemas
//
// A table is described once, up front: ordered columns with a closed set of
// logical types plus the chunking parameters that drive file partitioning.
// Nothing about a column's type is ever inferred from the data.

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod registry;

pub use registry::SchemaRegistry;
pub(crate) use registry::validate_table;

/// Logical column type declared in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Boolean,
    Int32,
    Int64,
    Utf8,
    Binary,
    /// Nanosecond precision, timezone-naive (UTC)
    Timestamp,
    /// Arbitrary JSON value stored as canonical text
    Json,
}

impl LogicalType {
    /// Arrow type the column has in every output file
    pub fn physical_type(&self) -> DataType {
        match self {
            LogicalType::Boolean => DataType::Boolean,
            LogicalType::Int32 => DataType::Int32,
            LogicalType::Int64 => DataType::Int64,
            LogicalType::Utf8 | LogicalType::Json => DataType::Utf8,
            LogicalType::Binary => DataType::Binary,
            LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Nanosecond, None),
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogicalType::Boolean => "boolean",
            LogicalType::Int32 => "int32",
            LogicalType::Int64 => "int64",
            LogicalType::Utf8 => "utf8",
            LogicalType::Binary => "binary",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Json => "json",
        };
        f.write_str(name)
    }
}

/// Parquet compression codec for a table's files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    Snappy,
    Uncompressed,
}

impl Compression {
    /// Codec spelling used in file names, `None` when files are uncompressed
    pub fn codec_name(&self) -> Option<&'static str> {
        match self {
            Compression::Zstd => Some("zstd"),
            Compression::Snappy => Some("snappy"),
            Compression::Uncompressed => None,
        }
    }

    pub(crate) fn to_parquet(self) -> parquet::basic::Compression {
        use parquet::basic::{Compression as Codec, ZstdLevel};
        match self {
            Compression::Zstd => Codec::ZSTD(ZstdLevel::default()),
            Compression::Snappy => Codec::SNAPPY,
            Compression::Uncompressed => Codec::UNCOMPRESSED,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.codec_name().unwrap_or("uncompressed"))
    }
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zstd" => Ok(Compression::Zstd),
            "snappy" | "snap" => Ok(Compression::Snappy),
            "none" | "uncompressed" => Ok(Compression::Uncompressed),
            _ => Err(format!(
                "Unsupported compression: {}. Supported: zstd, snappy, none",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub logical_type: LogicalType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
        }
    }
}

/// Immutable description of one exportable table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub chunk_size: usize,
    pub chunks_per_file: usize,
    #[serde(default)]
    pub compression: Compression,
}

impl TableSchema {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnSpec>,
        chunk_size: usize,
        chunks_per_file: usize,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            chunk_size,
            chunks_per_file,
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Nominal number of rows covered by one output file
    pub fn rows_per_file(&self) -> u64 {
        (self.chunk_size as u64).saturating_mul(self.chunks_per_file as u64)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Arrow schema every file of this table is written with.
    ///
    /// All fields are nullable: the source table may hold NULL in any column
    /// and the physical type must not depend on whether a batch happens to.
    pub fn arrow_schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.logical_type.physical_type(), true))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

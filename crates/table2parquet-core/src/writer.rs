// Columnar batch writer
//
// Owns exactly one output file. The physical schema is fixed at open time
// from the registry; every appended batch must match it exactly. Bytes are
// hashed as they are written so the finished file carries a content digest
// without a second read.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;

use crate::coerce::CoercedBatch;
use crate::error::{ExportError, Result};
use crate::schema::Compression;

pub const DEFAULT_ROW_GROUP_SIZE: usize = 32 * 1024;

/// Per-file Parquet settings
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub compression: Compression,
    pub row_group_size: usize,
    /// Recorded in the file's key-value metadata
    pub table_name: String,
}

impl WriterOptions {
    pub fn new(table_name: impl Into<String>, compression: Compression) -> Self {
        Self {
            compression,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            table_name: table_name.into(),
        }
    }

    pub fn with_row_group_size(mut self, row_group_size: usize) -> Self {
        if row_group_size > 0 {
            self.row_group_size = row_group_size;
        }
        self
    }
}

/// Writer properties for one output file
///
/// - Table-specific compression
/// - Dictionary encoding enabled
/// - Page-level statistics
/// - Exporter version and table name embedded in file metadata
pub fn writer_properties(options: &WriterOptions) -> WriterProperties {
    let metadata = vec![
        KeyValue {
            key: "table2parquet.version".to_string(),
            value: Some(env!("CARGO_PKG_VERSION").to_string()),
        },
        KeyValue {
            key: "table2parquet.table".to_string(),
            value: Some(options.table_name.clone()),
        },
    ];

    WriterProperties::builder()
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_compression(options.compression.to_parquet())
        .set_data_page_size_limit(256 * 1024)
        .set_write_batch_size(32 * 1024)
        .set_max_row_group_size(options.row_group_size)
        .set_dictionary_page_size_limit(128 * 1024)
        .set_key_value_metadata(Some(metadata))
        .build()
}

/// File sink that hashes everything written through it
struct HashingFile {
    inner: BufWriter<File>,
    hasher: blake3::Hasher,
    bytes_written: u64,
}

impl HashingFile {
    fn new(file: File) -> Self {
        Self {
            inner: BufWriter::new(file),
            hasher: blake3::Hasher::new(),
            bytes_written: 0,
        }
    }

    fn finish(mut self) -> io::Result<(u64, String)> {
        self.inner.flush()?;
        let file = self.inner.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok((self.bytes_written, self.hasher.finalize().to_hex().to_string()))
    }
}

impl Write for HashingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A finalized output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedFile {
    pub path: PathBuf,
    pub rows: u64,
    pub size_bytes: u64,
    /// Hex blake3 digest of the file contents
    pub blake3: String,
}

/// Appends coerced batches to a single Parquet file
pub struct BatchWriter {
    path: PathBuf,
    schema: SchemaRef,
    inner: Option<ArrowWriter<HashingFile>>,
    rows_written: u64,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("path", &self.path)
            .field("open", &self.inner.is_some())
            .field("rows_written", &self.rows_written)
            .finish()
    }
}

impl BatchWriter {
    pub fn open(
        path: impl Into<PathBuf>,
        schema: SchemaRef,
        options: &WriterOptions,
    ) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| ExportError::io(path.display(), e))?;
        let writer = ArrowWriter::try_new(
            HashingFile::new(file),
            schema.clone(),
            Some(writer_properties(options)),
        )
        .map_err(|e| ExportError::parquet(path.display(), e))?;

        tracing::debug!(path = %path.display(), compression = %options.compression, "Opened Parquet writer");

        Ok(Self {
            path,
            schema,
            inner: Some(writer),
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Append one batch; its schema must equal the writer's field by field
    pub fn append(&mut self, batch: CoercedBatch) -> Result<()> {
        let Some(writer) = self.inner.as_mut() else {
            return Err(self.closed());
        };
        check_schema(&self.schema, &batch.schema()).map_err(|reason| {
            ExportError::SchemaMismatch {
                path: self.path.display().to_string(),
                reason,
            }
        })?;

        writer
            .write(&batch)
            .map_err(|e| ExportError::parquet(self.path.display(), e))?;
        self.rows_written += batch.num_rows() as u64;
        Ok(())
    }

    /// Flush and finalize the file. No further appends are accepted.
    pub fn close(&mut self) -> Result<FinishedFile> {
        let Some(writer) = self.inner.take() else {
            return Err(self.closed());
        };
        let sink = writer
            .into_inner()
            .map_err(|e| ExportError::parquet(self.path.display(), e))?;
        let (size_bytes, blake3) = sink
            .finish()
            .map_err(|e| ExportError::io(self.path.display(), e))?;

        Ok(FinishedFile {
            path: self.path.clone(),
            rows: self.rows_written,
            size_bytes,
            blake3,
        })
    }

    /// Drop an unfinished file after a fatal error
    pub fn abort(mut self) {
        let was_open = self.inner.take().is_some();
        if !was_open {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partial file"
            ),
        }
    }

    fn closed(&self) -> ExportError {
        ExportError::WriterClosed {
            path: self.path.display().to_string(),
        }
    }
}

fn check_schema(expected: &SchemaRef, actual: &SchemaRef) -> std::result::Result<(), String> {
    if expected.fields().len() != actual.fields().len() {
        return Err(format!(
            "expected {} columns, batch has {}",
            expected.fields().len(),
            actual.fields().len()
        ));
    }
    for (want, got) in expected.fields().iter().zip(actual.fields().iter()) {
        if want.name() != got.name() {
            return Err(format!(
                "expected column '{}', batch has '{}'",
                want.name(),
                got.name()
            ));
        }
        if want.data_type() != got.data_type() {
            return Err(format!(
                "column '{}' expected {}, batch has {}",
                want.name(),
                want.data_type(),
                got.data_type()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use arrow::array::{Int32Array, RecordBatch, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn batch(ids: Vec<i32>) -> RecordBatch {
        let names: Vec<String> = ids.iter().map(|i| format!("row-{}", i)).collect();
        RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    fn options() -> WriterOptions {
        WriterOptions::new("events", Compression::Zstd)
    }

    #[test]
    fn appends_and_finalizes_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events_0_8_zstd.parquet");

        let mut writer = BatchWriter::open(&path, schema(), &options()).unwrap();
        writer.append(batch(vec![1, 2, 3])).unwrap();
        writer.append(batch(vec![4, 5])).unwrap();
        let finished = writer.close().unwrap();

        assert_eq!(finished.rows, 5);
        assert_eq!(finished.size_bytes, std::fs::metadata(&path).unwrap().len());
        assert_eq!(
            finished.blake3,
            blake3::hash(&std::fs::read(&path).unwrap()).to_hex().to_string()
        );

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"PAR1");

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 5);
    }

    #[test]
    fn file_metadata_names_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.parquet");
        let mut writer = BatchWriter::open(&path, schema(), &options()).unwrap();
        writer.append(batch(vec![1])).unwrap();
        writer.close().unwrap();

        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap()).unwrap();
        let kv = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .cloned()
            .unwrap_or_default();
        assert!(kv
            .iter()
            .any(|e| e.key == "table2parquet.table" && e.value.as_deref() == Some("events")));
    }

    #[test]
    fn mismatched_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            BatchWriter::open(dir.path().join("f.parquet"), schema(), &options()).unwrap();

        let other = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int64, true),
                Field::new("name", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(arrow::array::Int64Array::from(vec![1i64])),
                Arc::new(StringArray::from(vec!["x"])),
            ],
        )
        .unwrap();

        let err = writer.append(other).unwrap_err();
        assert_eq!(err.code(), ErrorCode::E103SchemaMismatch);
        assert!(err.to_string().contains("column 'id' expected Int32"));
        assert_eq!(writer.rows_written(), 0);
    }

    #[test]
    fn closed_writer_rejects_append_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            BatchWriter::open(dir.path().join("f.parquet"), schema(), &options()).unwrap();
        writer.append(batch(vec![1])).unwrap();
        writer.close().unwrap();
        assert!(!writer.is_open());

        let err = writer.append(batch(vec![2])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::E104WriterClosed);
        assert_eq!(writer.close().unwrap_err().code(), ErrorCode::E104WriterClosed);
    }

    #[test]
    fn abort_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.parquet");
        let mut writer = BatchWriter::open(&path, schema(), &options()).unwrap();
        writer.append(batch(vec![1])).unwrap();
        assert!(path.exists());
        writer.abort();
        assert!(!path.exists());
    }

    #[test]
    fn uncompressed_and_snappy_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        for compression in [Compression::Snappy, Compression::Uncompressed] {
            let path = dir.path().join(format!("{}.parquet", compression));
            let opts = WriterOptions::new("events", compression).with_row_group_size(2);
            let mut writer = BatchWriter::open(&path, schema(), &opts).unwrap();
            writer.append(batch(vec![1, 2, 3])).unwrap();
            let finished = writer.close().unwrap();
            assert_eq!(finished.rows, 3);

            let builder =
                ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap()).unwrap();
            // Row group size of 2 splits three rows into two groups.
            assert_eq!(builder.metadata().num_row_groups(), 2);
        }
    }
}

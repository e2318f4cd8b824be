//! File partitioner.
//!
//! Drives one table export: fetch a bounded chunk from the cursor, coerce it,
//! append it to the current file, and rotate to a new file every
//! `chunks_per_file` chunks. Finalized files are handed to the publication
//! sink and, once durably stored, recorded in the run manifest.
//!
//! File boundaries depend only on the chunk and file counters, so reruns of
//! the same table produce the same file names.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::coerce::{coerce, CoercedBatch};
use crate::error::Result;
use crate::manifest::ManifestRecorder;
use crate::schema::{validate_table, Compression, TableSchema};
use crate::sink::{PublicationSink, PublishError};
use crate::source::{CursorError, TableSource};
use crate::writer::{BatchWriter, FinishedFile, WriterOptions, DEFAULT_ROW_GROUP_SIZE};

/// Chunk size ceiling applied in reduced-scale runs
pub const REDUCED_CHUNK_SIZE: usize = 1000;

/// Run options, fixed for the lifetime of a partitioner
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Cap every table's chunk size at [`REDUCED_CHUNK_SIZE`]
    pub reduced_chunk_size: bool,
    /// Stop fetching once the first file has rotated
    pub stop_after_one_file: bool,
    /// Keep finalized files on local disk instead of publishing them
    pub skip_publish: bool,
    /// Rows skipped by the cursor before the first fetch
    pub row_offset: Option<u64>,
    /// Directory finalized files are written to before publication
    pub output_dir: PathBuf,
    pub row_group_size: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            reduced_chunk_size: false,
            stop_after_one_file: false,
            skip_publish: false,
            row_offset: None,
            output_dir: PathBuf::from("."),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }
}

impl ExportOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn effective_chunk_size(&self, table: &TableSchema) -> usize {
        if self.reduced_chunk_size {
            table.chunk_size.min(REDUCED_CHUNK_SIZE)
        } else {
            table.chunk_size
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Idle,
    Fetching,
    Coercing,
    Writing,
    RotatingFile,
    Finalizing,
    Done,
    Error,
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionState::Idle => "idle",
            PartitionState::Fetching => "fetching",
            PartitionState::Coercing => "coercing",
            PartitionState::Writing => "writing",
            PartitionState::RotatingFile => "rotating_file",
            PartitionState::Finalizing => "finalizing",
            PartitionState::Done => "done",
            PartitionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Descriptor of one output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub table_name: String,
    /// Nominal range, used only for naming
    pub row_range_start: u64,
    pub row_range_end: u64,
    pub compression: Compression,
    pub path: PathBuf,
}

impl OutputFile {
    /// Descriptor for the `file_index`-th file of a table
    pub fn new(
        table_name: &str,
        file_index: u64,
        rows_per_file: u64,
        compression: Compression,
        output_dir: &Path,
    ) -> Self {
        let row_range_start = file_index.saturating_mul(rows_per_file);
        let row_range_end = file_index.saturating_add(1).saturating_mul(rows_per_file);
        let name = file_name(table_name, row_range_start, row_range_end, compression);
        Self {
            table_name: table_name.to_string(),
            row_range_start,
            row_range_end,
            compression,
            path: output_dir.join(name),
        }
    }

    pub fn file_name(&self) -> String {
        file_name(
            &self.table_name,
            self.row_range_start,
            self.row_range_end,
            self.compression,
        )
    }

    /// Object key the file is published under: `<table>/<file name>`
    pub fn destination_key(&self) -> String {
        format!("{}/{}", self.table_name, self.file_name())
    }
}

/// `<table>_<start>_<end>_<codec>.parquet`, without the codec when uncompressed
pub fn file_name(table: &str, start: u64, end: u64, compression: Compression) -> String {
    match compression.codec_name() {
        Some(codec) => format!("{}_{}_{}_{}.parquet", table, start, end, codec),
        None => format!("{}_{}_{}.parquet", table, start, end),
    }
}

/// Outcome of exporting one table
#[derive(Debug)]
pub struct TableExport {
    pub table: String,
    pub rows: u64,
    pub chunks: u64,
    /// Finalized files in finalization order
    pub files: Vec<FinishedFile>,
    /// Destination keys that were published and recorded
    pub published: Vec<String>,
    pub failed: Vec<PublishError>,
    /// Local files left in place because publication was disabled
    pub skipped: Vec<PathBuf>,
}

impl TableExport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows: 0,
            chunks: 0,
            files: Vec::new(),
            published: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-table export state machine
pub struct Partitioner<'a> {
    table: &'a TableSchema,
    options: &'a ExportOptions,
    chunk_size: usize,
    rows_per_file: u64,
    state: PartitionState,
    chunk_counter: usize,
    file_counter: u64,
    current: Option<(OutputFile, BatchWriter)>,
    summary: TableExport,
}

impl<'a> Partitioner<'a> {
    /// Fails with `InvalidSchema` when the table cannot be chunked
    pub fn new(table: &'a TableSchema, options: &'a ExportOptions) -> Result<Self> {
        validate_table(table)?;
        let chunk_size = options.effective_chunk_size(table);
        let rows_per_file = (chunk_size as u64).saturating_mul(table.chunks_per_file as u64);
        Ok(Self {
            table,
            options,
            chunk_size,
            rows_per_file,
            state: PartitionState::Idle,
            chunk_counter: 0,
            file_counter: 0,
            current: None,
            summary: TableExport::new(&table.name),
        })
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Export the whole table. A fatal error removes any partially written file.
    pub async fn run(
        mut self,
        source: &dyn TableSource,
        sink: &dyn PublicationSink,
        recorder: &mut ManifestRecorder,
    ) -> Result<TableExport> {
        match self.drive(source, sink, recorder).await {
            Ok(()) => {
                self.transition(PartitionState::Done);
                Ok(self.summary)
            }
            Err(err) => {
                self.transition(PartitionState::Error);
                if let Some((_, writer)) = self.current.take() {
                    writer.abort();
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        source: &dyn TableSource,
        sink: &dyn PublicationSink,
        recorder: &mut ManifestRecorder,
    ) -> Result<()> {
        self.transition(PartitionState::Fetching);
        let mut cursor = source.scan(self.table, self.options.row_offset).await?;

        loop {
            if self.options.stop_after_one_file && self.file_counter > 0 {
                tracing::info!(table = %self.table.name, "Stopping after first file");
                break;
            }

            let started = Instant::now();
            let batch = match cursor.fetch(self.chunk_size).await? {
                Some(batch) if !batch.is_empty() => batch,
                _ => break,
            };
            if batch.len() > self.chunk_size {
                return Err(CursorError::Overrun {
                    table: self.table.name.clone(),
                    rows: batch.len(),
                    max_rows: self.chunk_size,
                }
                .into());
            }
            tracing::debug!(
                table = %self.table.name,
                rows = batch.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetched chunk"
            );

            self.transition(PartitionState::Coercing);
            let started = Instant::now();
            let coerced = coerce(batch, self.table)?;
            tracing::debug!(
                table = %self.table.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Coerced chunk"
            );

            self.transition(PartitionState::Writing);
            self.write_chunk(coerced)?;

            if self.chunk_counter == self.table.chunks_per_file {
                self.transition(PartitionState::RotatingFile);
                self.finish_file(sink, recorder).await?;
                self.chunk_counter = 0;
                self.file_counter += 1;
            }
            self.transition(PartitionState::Fetching);
        }

        self.transition(PartitionState::Finalizing);
        if self.current.is_some() {
            self.finish_file(sink, recorder).await?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, batch: CoercedBatch) -> Result<()> {
        if self.current.is_none() {
            let file = OutputFile::new(
                &self.table.name,
                self.file_counter,
                self.rows_per_file,
                self.table.compression,
                &self.options.output_dir,
            );
            let options = WriterOptions::new(&self.table.name, self.table.compression)
                .with_row_group_size(self.options.row_group_size);
            let writer = BatchWriter::open(&file.path, self.table.arrow_schema(), &options)?;
            self.current = Some((file, writer));
        }

        let rows = batch.num_rows() as u64;
        if let Some((file, writer)) = self.current.as_mut() {
            writer.append(batch)?;
            tracing::debug!(
                table = %self.table.name,
                chunk = self.chunk_counter,
                file = %file.file_name(),
                "Wrote chunk"
            );
        }
        self.chunk_counter += 1;
        self.summary.rows += rows;
        self.summary.chunks += 1;
        Ok(())
    }

    /// Close the open file and hand it to the sink
    async fn finish_file(
        &mut self,
        sink: &dyn PublicationSink,
        recorder: &mut ManifestRecorder,
    ) -> Result<()> {
        let Some((file, mut writer)) = self.current.take() else {
            return Ok(());
        };
        let finished = match writer.close() {
            Ok(finished) => finished,
            Err(err) => {
                discard(&file.path);
                return Err(err);
            }
        };
        tracing::info!(
            table = %self.table.name,
            file = %file.file_name(),
            rows = finished.rows,
            size_bytes = finished.size_bytes,
            blake3 = %finished.blake3,
            "Wrote file"
        );
        self.summary.files.push(finished);

        if self.options.skip_publish {
            tracing::warn!(path = %file.path.display(), "Publication disabled, keeping local file");
            self.summary.skipped.push(file.path);
            return Ok(());
        }

        let key = file.destination_key();
        match sink.publish(&file.path, &key).await {
            Ok(()) => {
                tracing::info!(table = %self.table.name, key = %key, "Published file");
                recorder.record(&self.table.name, key.clone());
                self.summary.published.push(key);
            }
            Err(err) => {
                tracing::error!(table = %self.table.name, key = %key, error = %err, "Publication failed");
                self.summary.failed.push(err);
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: PartitionState) {
        if self.state != next {
            tracing::debug!(table = %self.table.name, from = %self.state, to = %next, "State transition");
            self.state = next;
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}

/// Export one table with a fresh partitioner
pub async fn export_table(
    table: &TableSchema,
    source: &dyn TableSource,
    sink: &dyn PublicationSink,
    recorder: &mut ManifestRecorder,
    options: &ExportOptions,
) -> Result<TableExport> {
    tracing::info!(table = %table.name, "Exporting table");
    let summary = Partitioner::new(table, options)?
        .run(source, sink, recorder)
        .await?;
    tracing::info!(
        table = %summary.table,
        rows = summary.rows,
        files = summary.files.len(),
        failed = summary.failed.len(),
        "Finished table"
    );
    Ok(summary)
}

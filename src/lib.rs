// table2parquet - Export relational tables to Parquet on object storage
//
// Runs one partitioner per selected table, in registry order, then writes
// and publishes the run manifest.

use anyhow::{Context, Result};
use std::path::Path;
use table2parquet_core::{
    export_table, ExportError, ExportOptions, Manifest, ManifestRecorder, NdjsonSource,
    PostgresSource, PublicationSink, PublishError, SchemaRegistry, TableExport, TableSource,
    MANIFEST_KEY,
};
use tracing::{error, info, warn};

mod init;

pub use init::{describe_storage, init_tracing};
pub use table2parquet_config::RuntimeConfig;

/// Outcome of a complete export run
#[derive(Debug)]
pub struct RunReport {
    /// Tables that ran to completion (possibly with failed publications)
    pub tables: Vec<TableExport>,
    /// Tables aborted by a fatal error
    pub failed_tables: Vec<(String, ExportError)>,
    pub manifest: Manifest,
    /// The manifest could not be written locally, so it was not published
    pub manifest_write_error: Option<ExportError>,
    pub manifest_error: Option<PublishError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed_tables.is_empty()
            && self.manifest_write_error.is_none()
            && self.manifest_error.is_none()
            && self.tables.iter().all(TableExport::is_success)
    }

    /// Turn any table, file or manifest failure into an error listing them
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }

        let mut problems = Vec::new();
        for (table, err) in &self.failed_tables {
            problems.push(format!("table '{}': {}", table, err));
        }
        for export in &self.tables {
            for err in &export.failed {
                problems.push(format!("file '{}': {}", err.key, err));
            }
        }
        if let Some(err) = &self.manifest_write_error {
            problems.push(format!("manifest: {}", err));
        }
        if let Some(err) = &self.manifest_error {
            problems.push(format!("manifest: {}", err));
        }
        anyhow::bail!("Export finished with failures:\n  {}", problems.join("\n  "))
    }
}

/// Export the selected tables (all of them when `selected` is `None`).
///
/// An unknown table name fails before anything is read or written. A table
/// that fails mid-way does not stop the remaining tables; the manifest
/// always lists every file that was published.
pub async fn run_export(
    registry: &SchemaRegistry,
    selected: Option<&str>,
    options: &ExportOptions,
    source: &dyn TableSource,
    sink: &dyn PublicationSink,
) -> Result<RunReport> {
    let tables = registry.select(selected)?;

    tokio::fs::create_dir_all(&options.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                options.output_dir.display()
            )
        })?;

    let mut recorder = ManifestRecorder::new();
    let mut exported = Vec::new();
    let mut failed_tables = Vec::new();

    for table in tables {
        match export_table(table, source, sink, &mut recorder, options).await {
            Ok(summary) => exported.push(summary),
            Err(err) => {
                error!(table = %table.name, code = %err.code(), error = %err, "Table export failed");
                failed_tables.push((table.name.clone(), err));
            }
        }
    }

    let manifest = recorder.finalize();
    let manifest_path = options.output_dir.join(MANIFEST_KEY);
    let (manifest_write_error, manifest_error) = match manifest.write_to(&manifest_path) {
        Ok(()) => {
            info!(
                path = %manifest_path.display(),
                files = manifest.file_count(),
                "Manifest written"
            );
            (None, publish_manifest(&manifest_path, options, sink).await)
        }
        Err(err) => {
            error!(code = %err.code(), error = %err, "Failed to write manifest");
            (Some(err), None)
        }
    };

    Ok(RunReport {
        tables: exported,
        failed_tables,
        manifest,
        manifest_write_error,
        manifest_error,
    })
}

async fn publish_manifest(
    path: &Path,
    options: &ExportOptions,
    sink: &dyn PublicationSink,
) -> Option<PublishError> {
    if options.skip_publish {
        warn!(path = %path.display(), "Publication disabled, keeping local manifest");
        return None;
    }
    match sink.publish(path, MANIFEST_KEY).await {
        Ok(()) => {
            info!(key = MANIFEST_KEY, "Published manifest");
            None
        }
        Err(err) => {
            error!(error = %err, "Manifest publication failed");
            Some(err)
        }
    }
}

/// Run an export entirely from configuration: rows from the PostgreSQL
/// database in `source.database_url` (NDJSON dumps in `source.dir` when
/// unset), publication through the configured storage backend.
pub async fn run(config: &RuntimeConfig) -> Result<RunReport> {
    let registry = config.registry()?;
    let options = config.export_options();
    let source = source_from_config(config)?;

    if options.skip_publish {
        return run_export(
            &registry,
            config.export.table.as_deref(),
            &options,
            source.as_ref(),
            &DisabledSink,
        )
        .await;
    }

    let sink = table2parquet_storage::sink_from_config(&config.storage)
        .context("Failed to initialize storage")?;
    run_export(
        &registry,
        config.export.table.as_deref(),
        &options,
        source.as_ref(),
        &sink,
    )
    .await
}

fn source_from_config(config: &RuntimeConfig) -> Result<Box<dyn TableSource>> {
    match &config.source.database_url {
        Some(url) => {
            let mut source =
                PostgresSource::new(url).context("Invalid source.database_url")?;
            if let Some(schema) = &config.source.schema {
                source = source.with_schema(schema);
            }
            Ok(Box::new(source))
        }
        None => Ok(Box::new(NdjsonSource::new(&config.source.dir))),
    }
}

/// Stand-in sink for runs with publication disabled
struct DisabledSink;

#[async_trait::async_trait]
impl PublicationSink for DisabledSink {
    async fn publish(&self, local_path: &Path, destination_key: &str) -> Result<(), PublishError> {
        Err(PublishError::new(
            local_path,
            destination_key,
            "publication is disabled",
        ))
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use table2parquet::RuntimeConfig;

/// Export relational tables to partitioned Parquet files on object storage
#[derive(Parser)]
#[command(name = "table2parquet")]
#[command(version)]
#[command(about = "Export relational tables to partitioned Parquet files on object storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Export only this table
    #[arg(short, long, value_name = "NAME", global = true)]
    table: Option<String>,

    /// Skip this many rows of each table before exporting
    #[arg(long, value_name = "N", global = true)]
    offset: Option<u64>,

    /// Small chunks, first file of each table only
    #[arg(long, global = true)]
    reduced_scale: bool,

    /// Keep finalized files locally instead of publishing them
    #[arg(long, global = true)]
    skip_publish: bool,

    /// Local directory finalized files are written to
    #[arg(short, long, value_name = "DIR", global = true)]
    output: Option<PathBuf>,

    /// Directory holding `<table>.ndjson` dumps
    #[arg(short, long, value_name = "DIR", global = true)]
    source: Option<PathBuf>,

    /// PostgreSQL connection string to read tables from instead of dumps
    #[arg(long, value_name = "URL", global = true)]
    database_url: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export tables and publish them (default if no subcommand given)
    Export,
    /// List the tables known to the schema registry
    Tables,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Tables) => list_tables(&cli),
        Some(Commands::Export) | None => run_export(cli),
    }
}

/// File and env first, CLI flags on top, then a single validation pass
fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(config_path) => table2parquet_config::resolve_config(Some(config_path.as_path()))
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?,
        None => table2parquet_config::resolve_config(None)
            .context("Failed to load configuration")?,
    };

    apply_cli_overrides(&mut config, cli);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(table) = &cli.table {
        config.export.table = Some(table.clone());
    }
    if let Some(offset) = cli.offset {
        config.export.row_offset = Some(offset);
    }
    if cli.reduced_scale {
        config.export.reduced_scale = true;
    }
    if cli.skip_publish {
        config.export.skip_publish = true;
    }
    if let Some(output) = &cli.output {
        config.export.output_dir = output.to_string_lossy().to_string();
    }
    if let Some(source) = &cli.source {
        config.source.dir = source.to_string_lossy().to_string();
    }
    if let Some(url) = &cli.database_url {
        config.source.database_url = Some(url.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
}

fn list_tables(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let registry = config.registry()?;

    println!(
        "{:<24} {:>8} {:>10} {:>8} {:>12}  CODEC",
        "TABLE", "COLUMNS", "CHUNK", "CHUNKS", "ROWS/FILE"
    );
    for table in registry.tables() {
        println!(
            "{:<24} {:>8} {:>10} {:>8} {:>12}  {}",
            table.name,
            table.columns.len(),
            table.chunk_size,
            table.chunks_per_file,
            table.rows_per_file(),
            table.compression
        );
    }
    Ok(())
}

fn run_export(cli: Cli) -> Result<()> {
    // Build tokio runtime and run the export
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    table2parquet::init_tracing(&config);
    display_startup_info(&config);

    let report = table2parquet::run(&config).await?;
    tracing::info!(
        tables = report.tables.len(),
        files = report.manifest.file_count(),
        "Export finished"
    );
    report.ensure_success()
}

fn display_startup_info(config: &RuntimeConfig) {
    use tracing::info;

    info!("table2parquet v{}", env!("CARGO_PKG_VERSION"));
    match &config.export.table {
        Some(table) => info!("Table: {}", table),
        None => info!("Tables: all"),
    }
    match (&config.source.database_url, &config.source.schema) {
        (Some(_), Some(schema)) => info!("Source: PostgreSQL, schema {}", schema),
        (Some(_), None) => info!("Source: PostgreSQL"),
        (None, _) => info!("Source directory: {}", config.source.dir),
    }
    info!("Output directory: {}", config.export.output_dir);
    if config.export.reduced_scale {
        info!("Reduced-scale run: chunks capped, first file per table only");
    }
    if let Some(offset) = config.export.row_offset {
        info!("Row offset: {}", offset);
    }
    info!("Storage backend: {}", config.storage.backend);
    table2parquet::describe_storage(config);
}

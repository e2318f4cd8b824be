// Logging and storage startup reporting

use table2parquet_config::{LogFormat, RuntimeConfig, StorageBackend};
use tracing::info;

/// Initialize tracing/logging from RuntimeConfig
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Parse log level from config
    let env_filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.logging.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}

/// Log where finalized files will be published
pub fn describe_storage(config: &RuntimeConfig) {
    if config.export.skip_publish {
        info!("Publication disabled; files stay in {}", config.export.output_dir);
        return;
    }

    match config.storage.backend {
        StorageBackend::Fs => {
            if let Some(fs) = config.storage.fs.as_ref() {
                info!("Publishing to filesystem storage at: {}", fs.path);
            }
        }
        StorageBackend::S3 => {
            if let Some(s3) = config.storage.s3.as_ref() {
                info!(
                    "Publishing to S3 storage: bucket={}, region={}",
                    s3.bucket, s3.region
                );
            }
        }
        StorageBackend::R2 => {
            if let Some(r2) = config.storage.r2.as_ref() {
                info!(
                    "Publishing to R2 storage: endpoint={}, bucket={}",
                    r2.endpoint_url(),
                    r2.bucket
                );
            }
        }
    }
}

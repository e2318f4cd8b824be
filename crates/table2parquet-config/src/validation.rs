// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Context, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_export_config(&config.export)?;

    validate_source_config(&config.source)?;

    validate_storage_config(&config.storage, config.export.skip_publish)?;

    // Table definitions are checked the same way the registry checks them
    config.registry()?;

    Ok(())
}

fn validate_export_config(config: &ExportConfig) -> Result<()> {
    if config.output_dir.is_empty() {
        bail!("export.output_dir must not be empty");
    }

    if config.row_group_size == 0 {
        bail!("export.row_group_size must be greater than 0");
    }

    if config.row_group_size > 1_048_576 {
        warn!(
            row_group_size = config.row_group_size,
            "export.row_group_size is very large; may cause memory issues"
        );
    }

    if matches!(config.table.as_deref(), Some("")) {
        bail!("export.table must not be empty when set");
    }

    Ok(())
}

fn validate_source_config(config: &SourceConfig) -> Result<()> {
    match config.database_url.as_deref() {
        Some(url) => {
            table2parquet_core::PostgresSource::new(url)
                .context("source.database_url is not a valid connection string")?;
            if matches!(config.schema.as_deref(), Some("")) {
                bail!("source.schema must not be empty when set");
            }
        }
        None => {
            if config.dir.is_empty() {
                bail!("source.dir must not be empty");
            }
        }
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig, skip_publish: bool) -> Result<()> {
    if skip_publish {
        // Nothing is uploaded, so backend settings are never used
        return Ok(());
    }

    match config.backend {
        StorageBackend::Fs => {
            let fs = config
                .fs
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("fs storage backend requires 'fs' configuration"))?;

            if fs.path.is_empty() {
                bail!("storage.fs.path must not be empty");
            }
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("s3 storage backend requires 's3' configuration"))?;

            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket is required for S3 backend");
            }

            if s3.region.is_empty() {
                bail!("storage.s3.region is required for S3 backend");
            }
        }
        StorageBackend::R2 => {
            let r2 = config
                .r2
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("r2 storage backend requires 'r2' configuration"))?;

            if r2.bucket.is_empty() {
                bail!("storage.r2.bucket is required for R2 backend");
            }

            if r2.account_id.is_empty() && r2.endpoint.is_none() {
                bail!("storage.r2.account_id or storage.r2.endpoint is required for R2 backend");
            }

            if r2.access_key_id.is_empty() {
                bail!("storage.r2.access_key_id is required for R2 backend");
            }

            if r2.secret_access_key.is_empty() {
                bail!("storage.r2.secret_access_key is required for R2 backend");
            }
        }
    }

    Ok(())
}

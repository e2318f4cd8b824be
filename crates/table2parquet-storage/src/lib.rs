//! Object storage for finalized export files
//!
//! Builds an OpenDAL operator from the storage configuration and exposes it
//! as a [`PublicationSink`](table2parquet_core::PublicationSink).

use anyhow::{anyhow, Context, Result};
use opendal::Operator;
use table2parquet_config::{StorageBackend, StorageConfig};

mod sink;

pub use sink::ObjectStoreSink;

/// Create an operator for the configured backend
pub fn build_operator(config: &StorageConfig) -> Result<Operator> {
    let operator = match config.backend {
        StorageBackend::Fs => {
            let fs = config
                .fs
                .as_ref()
                .ok_or_else(|| anyhow!("fs config required for filesystem backend"))?;

            let fs_builder = opendal::services::Fs::default().root(&fs.path);
            Operator::new(fs_builder)
                .context("Failed to create filesystem operator")?
                .finish()
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| anyhow!("s3 config required for S3 backend"))?;

            let mut s3_builder = opendal::services::S3::default()
                .bucket(&s3.bucket)
                .region(&s3.region);

            if let Some(endpoint) = &s3.endpoint {
                s3_builder = s3_builder.endpoint(endpoint);
            }

            Operator::new(s3_builder)
                .context("Failed to create S3 operator")?
                .finish()
        }
        StorageBackend::R2 => {
            let r2 = config
                .r2
                .as_ref()
                .ok_or_else(|| anyhow!("r2 config required for R2 backend"))?;

            let r2_builder = opendal::services::S3::default()
                .bucket(&r2.bucket)
                .region("auto")
                .endpoint(&r2.endpoint_url())
                .access_key_id(&r2.access_key_id)
                .secret_access_key(&r2.secret_access_key);

            Operator::new(r2_builder)
                .context("Failed to create R2 operator")?
                .finish()
        }
    };

    tracing::debug!(backend = %config.backend, "Storage operator initialized");
    Ok(operator)
}

/// Key prefix configured for the active backend. Always ends with "/" when present.
pub fn storage_prefix(config: &StorageConfig) -> Option<String> {
    match config.backend {
        StorageBackend::Fs => None,
        StorageBackend::S3 => config.s3.as_ref().and_then(|s3| s3.prefix.clone()),
        StorageBackend::R2 => config.r2.as_ref().and_then(|r2| r2.prefix.clone()),
    }
}

/// Operator plus prefix, ready to publish
pub fn sink_from_config(config: &StorageConfig) -> Result<ObjectStoreSink> {
    let operator = build_operator(config)?;
    Ok(ObjectStoreSink::new(operator).with_prefix(storage_prefix(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use table2parquet_config::{FsConfig, S3Config};

    #[test]
    fn fs_operator_uses_configured_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig {
                path: dir.path().to_string_lossy().into_owned(),
            }),
            s3: None,
            r2: None,
        };
        let operator = build_operator(&config).unwrap();
        assert_eq!(operator.info().scheme(), opendal::Scheme::Fs);
        assert_eq!(storage_prefix(&config), None);
    }

    #[test]
    fn missing_backend_section_is_an_error() {
        let config = StorageConfig {
            backend: StorageBackend::S3,
            fs: None,
            s3: None,
            r2: None,
        };
        assert!(build_operator(&config).is_err());
    }

    #[test]
    fn prefix_follows_backend() {
        let config = StorageConfig {
            backend: StorageBackend::S3,
            fs: None,
            s3: Some(S3Config {
                bucket: "archive".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                prefix: Some("exports/".to_string()),
            }),
            r2: None,
        };
        assert_eq!(storage_prefix(&config).as_deref(), Some("exports/"));
    }
}

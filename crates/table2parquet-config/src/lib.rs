// table2parquet-config - Runtime configuration
//
// Supports configuration from multiple sources:
// 1. Environment variables with the TABLE2PARQUET_ prefix (highest priority)
// 2. Legacy unprefixed variables (DEBUG, DEBUG_TABLE, S3_BUCKET_NAME, ...)
// 3. Config file path from TABLE2PARQUET_CONFIG (or --config)
// 4. Default config file (./table2parquet.toml)
// 5. Built-in defaults (lowest priority)
//
// CLI flags are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use table2parquet_core::{
    Compression, ExportOptions, SchemaRegistry, TableSchema, DEFAULT_ROW_GROUP_SIZE,
};

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{apply_env_overrides, EnvSource, ENV_PREFIX};
pub use sources::{
    load_config, load_from_file_path, load_with_env, resolve_config, resolve_with_env,
    StdEnvSource,
};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Extra or overriding table definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableSchema>,
}

/// What to export and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Export only this table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_offset: Option<u64>,
    /// Cap chunk sizes and stop after the first file of each table
    #[serde(default)]
    pub reduced_scale: bool,
    #[serde(default)]
    pub stop_after_one_file: bool,
    #[serde(default)]
    pub skip_publish: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_row_group_size")]
    pub row_group_size: usize,
    /// Overrides the codec of every table when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

fn default_output_dir() -> String {
    "./export".to_string()
}

fn default_row_group_size() -> usize {
    DEFAULT_ROW_GROUP_SIZE
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            table: None,
            row_offset: None,
            reduced_scale: false,
            stop_after_one_file: false,
            skip_publish: false,
            output_dir: default_output_dir(),
            row_group_size: default_row_group_size(),
            compression: None,
        }
    }
}

/// Where table rows are read from: a PostgreSQL database when
/// `database_url` is set, otherwise NDJSON dumps in `dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_dir")]
    pub dir: String,
    /// libpq connection string or `postgres://` URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Schema that scanned tables are qualified with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

fn default_source_dir() -> String {
    "./dumps".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: default_source_dir(),
            database_url: None,
            schema: None,
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2: Option<R2Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig::default()),
            s3: None,
            r2: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    R2,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::R2 => write!(f, "r2"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            "r2" | "cloudflare" => Ok(StorageBackend::R2),
            _ => anyhow::bail!("Unsupported storage backend: {}. Supported: fs, s3, r2", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./published".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct R2Config {
    pub bucket: String,
    #[serde(default)]
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Full endpoint URL; derived from `account_id` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl R2Config {
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.r2.cloudflarestorage.com", self.account_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Built-in tables plus `[[tables]]`, with the global codec override applied
    pub fn registry(&self) -> Result<SchemaRegistry> {
        let registry = SchemaRegistry::builtin()
            .with_overrides(self.tables.clone())
            .context("Invalid [[tables]] definition")?;

        match self.export.compression {
            Some(codec) => SchemaRegistry::new(
                registry
                    .tables()
                    .cloned()
                    .map(|table| table.with_compression(codec))
                    .collect(),
            )
            .context("Failed to apply compression override"),
            None => Ok(registry),
        }
    }

    /// Partitioner options derived from `[export]`
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            reduced_chunk_size: self.export.reduced_scale,
            stop_after_one_file: self.export.stop_after_one_file || self.export.reduced_scale,
            skip_publish: self.export.skip_publish,
            row_offset: self.export.row_offset,
            output_dir: PathBuf::from(&self.export.output_dir),
            row_group_size: self.export.row_group_size,
        }
    }
}

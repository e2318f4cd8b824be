use crate::{FsConfig, LogFormat, R2Config, RuntimeConfig, S3Config, StorageBackend};
use anyhow::{anyhow, Context, Result};
use table2parquet_core::Compression;

pub const ENV_PREFIX: &str = "TABLE2PARQUET_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the TABLE2PARQUET_ prefix
    /// Used for legacy and AWS standard variables
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides to the runtime config.
///
/// Legacy unprefixed variables are applied first so that their prefixed
/// equivalents win when both are set.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    apply_legacy_overrides(config, env)?;

    // Export selection and run mode
    if let Some(table) = get_env_string(env, "TABLE")? {
        config.export.table = non_empty(table);
    }
    if let Some(offset) = get_env_u64(env, "ROW_OFFSET")? {
        config.export.row_offset = Some(offset);
    }
    if let Some(val) = get_env_bool(env, "REDUCED_SCALE")? {
        config.export.reduced_scale = val;
    }
    if let Some(val) = get_env_bool(env, "STOP_AFTER_ONE_FILE")? {
        config.export.stop_after_one_file = val;
    }
    if let Some(val) = get_env_bool(env, "SKIP_PUBLISH")? {
        config.export.skip_publish = val;
    }
    if let Some(dir) = get_env_string(env, "OUTPUT_DIR")? {
        config.export.output_dir = dir;
    }
    if let Some(val) = get_env_usize(env, "ROW_GROUP_SIZE")? {
        config.export.row_group_size = val;
    }
    if let Some(codec) = get_env_string(env, "COMPRESSION")? {
        let parsed = codec
            .parse::<Compression>()
            .map_err(|e| anyhow!("Invalid {}COMPRESSION value: {}", ENV_PREFIX, e))?;
        config.export.compression = Some(parsed);
    }

    // Source
    if let Some(dir) = get_env_string(env, "SOURCE_DIR")? {
        config.source.dir = dir;
    }
    if let Some(url) = get_env_string(env, "DATABASE_URL")? {
        config.source.database_url = non_empty(url);
    }
    if let Some(schema) = get_env_string(env, "SOURCE_SCHEMA")? {
        config.source.schema = non_empty(schema);
    }

    // Logging
    if let Some(level) = get_env_string(env, "LOG_LEVEL")? {
        config.logging.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT")? {
        config.logging.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    // Storage backend
    if let Some(backend) = get_env_string(env, "STORAGE_BACKEND")? {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid TABLE2PARQUET_STORAGE_BACKEND value")?;
    }
    // Filesystem storage
    if let Some(path) = get_env_string(env, "STORAGE_PATH")? {
        config.storage.fs.get_or_insert_with(FsConfig::default).path = path;
    }

    // S3 storage
    if let Some(bucket) = get_env_string(env, "S3_BUCKET")? {
        ensure_s3(config).bucket = bucket;
    }
    if let Some(region) = get_env_string(env, "S3_REGION")? {
        ensure_s3(config).region = region;
    }
    if let Some(endpoint) = get_env_string(env, "S3_ENDPOINT")? {
        ensure_s3(config).endpoint = Some(endpoint);
    }
    if let Some(prefix) = get_env_string(env, "S3_PREFIX")? {
        ensure_s3(config).prefix = normalize_prefix(prefix);
    }

    // R2 storage
    if let Some(bucket) = get_env_string(env, "R2_BUCKET")? {
        ensure_r2(config).bucket = bucket;
    }
    if let Some(account_id) = get_env_string(env, "R2_ACCOUNT_ID")? {
        ensure_r2(config).account_id = account_id;
    }
    if let Some(prefix) = get_env_string(env, "R2_PREFIX")? {
        ensure_r2(config).prefix = normalize_prefix(prefix);
    }

    Ok(())
}

/// Variables understood by earlier deployments of the exporter
fn apply_legacy_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Any non-empty DEBUG value switches to a reduced-scale run
    if let Some(debug) = get_raw_env_string(env, "DEBUG")? {
        if !debug.is_empty() {
            config.export.reduced_scale = true;
        }
    }
    if let Some(table) = get_raw_env_string(env, "DEBUG_TABLE")? {
        if let Some(table) = non_empty(table) {
            config.export.table = Some(table);
        }
    }
    if let Some(offset) = get_raw_env_string(env, "DEBUG_OFFSET")? {
        if !offset.is_empty() {
            let parsed = offset
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse DEBUG_OFFSET: {}", e))?;
            config.export.row_offset = Some(parsed);
        }
    }

    if let Some(url) = legacy_database_url(env)? {
        config.source.database_url = Some(url);
    }

    let mut legacy_bucket = false;
    if let Some(bucket) = get_raw_env_string(env, "S3_BUCKET_NAME")? {
        legacy_bucket = !bucket.is_empty();
        ensure_s3(config).bucket = bucket;
    }
    if let Some(endpoint) = get_raw_env_string(env, "S3_ENDPOINT_URL")? {
        ensure_s3(config).endpoint = Some(endpoint);
    }

    // AWS standard credentials (without TABLE2PARQUET_ prefix for compatibility)
    if let Some(access_key_id) = get_raw_env_string(env, "AWS_ACCESS_KEY_ID")? {
        ensure_r2(config).access_key_id = access_key_id;
    }
    if let Some(secret_access_key) = get_raw_env_string(env, "AWS_SECRET_ACCESS_KEY")? {
        ensure_r2(config).secret_access_key = secret_access_key;
    }
    if let Some(endpoint) = get_raw_env_string(env, "AWS_ENDPOINT_URL")? {
        ensure_r2(config).endpoint = Some(endpoint);
    }

    if legacy_bucket {
        select_legacy_backend(config);
    }

    Ok(())
}

/// A legacy bucket means publication goes to that bucket: R2 when the
/// endpoint is a Cloudflare one and keys are present, S3 otherwise.
/// `TABLE2PARQUET_STORAGE_BACKEND` is applied later and still wins.
fn select_legacy_backend(config: &mut RuntimeConfig) {
    let Some(s3) = config.storage.s3.clone() else {
        return;
    };
    let r2_endpoint = s3.endpoint.as_deref().is_some_and(is_r2_endpoint);
    let r2_keys = config
        .storage
        .r2
        .as_ref()
        .is_some_and(|r2| !r2.access_key_id.is_empty() && !r2.secret_access_key.is_empty());

    if r2_endpoint && r2_keys {
        let r2 = ensure_r2(config);
        r2.bucket = s3.bucket;
        if r2.endpoint.is_none() {
            r2.endpoint = s3.endpoint;
        }
        if r2.prefix.is_none() {
            r2.prefix = s3.prefix;
        }
        config.storage.backend = StorageBackend::R2;
    } else {
        config.storage.backend = StorageBackend::S3;
    }
}

fn is_r2_endpoint(endpoint: &str) -> bool {
    endpoint.contains(".r2.cloudflarestorage.com")
}

/// Connection string assembled from DB_HOST, DB_PORT, DB_USER,
/// DB_PASSWORD and DB_NAME when DB_HOST is set
fn legacy_database_url<E: EnvSource>(env: &E) -> Result<Option<String>> {
    let Some(host) = get_raw_env_string(env, "DB_HOST")?.and_then(non_empty) else {
        return Ok(None);
    };
    let mut parts = vec![format!("host={}", quote_conninfo(&host))];
    for (var, key) in [
        ("DB_PORT", "port"),
        ("DB_USER", "user"),
        ("DB_PASSWORD", "password"),
        ("DB_NAME", "dbname"),
    ] {
        if let Some(value) = get_raw_env_string(env, var)?.and_then(non_empty) {
            parts.push(format!("{}={}", key, quote_conninfo(&value)));
        }
    }
    Ok(Some(parts.join(" ")))
}

fn quote_conninfo(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn ensure_s3(config: &mut RuntimeConfig) -> &mut S3Config {
    config.storage.s3.get_or_insert_with(|| S3Config {
        region: "us-east-1".to_string(),
        ..S3Config::default()
    })
}

fn ensure_r2(config: &mut RuntimeConfig) -> &mut R2Config {
    config.storage.r2.get_or_insert_with(R2Config::default)
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Result<Option<String>> {
    Ok(env.get(key))
}

fn get_raw_env_string<E: EnvSource>(env: &E, key: &str) -> Result<Option<String>> {
    Ok(env.get_raw(key))
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val.parse::<bool>().map_err(|e| {
                anyhow!(
                    "Failed to parse {}{} (expected bool): {}",
                    ENV_PREFIX,
                    key,
                    e
                )
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn normalize_prefix(prefix: String) -> Option<String> {
    if prefix.is_empty() {
        None
    } else if prefix.ends_with('/') {
        Some(prefix)
    } else {
        Some(format!("{}/", prefix))
    }
}

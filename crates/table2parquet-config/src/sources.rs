// Configuration source loading.
//
// Priority order:
// 1. Environment variables (TABLE2PARQUET_* prefix, then legacy names)
// 2. Config file path from TABLE2PARQUET_CONFIG
// 3. Default config file (./table2parquet.toml)
// 4. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "./table2parquet.toml";

/// Load configuration from the process environment and config files.
pub fn load_config() -> Result<RuntimeConfig> {
    load_with_env(None, &StdEnvSource)
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Returns error if the file doesn't exist or can't be parsed.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    load_with_env(Some(path.as_ref()), &StdEnvSource)
}

/// Resolve the config file (explicit path first), then apply env overrides
/// from `env` and validate.
pub fn load_with_env<E: EnvSource>(path: Option<&Path>, env: &E) -> Result<RuntimeConfig> {
    let config = resolve_with_env(path, env)?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_with_env`] against the process environment, but without
/// validation, for callers that layer further overrides (CLI flags) first.
pub fn resolve_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    resolve_with_env(path, &StdEnvSource)
}

/// Config file plus env overrides, unvalidated
pub fn resolve_with_env<E: EnvSource>(path: Option<&Path>, env: &E) -> Result<RuntimeConfig> {
    let mut config = match config_file(path, env) {
        Some(path) => read_file(&path)?,
        None => RuntimeConfig::default(),
    };

    env_overrides::apply_env_overrides(&mut config, env)?;
    Ok(config)
}

fn config_file<E: EnvSource>(explicit: Option<&Path>, env: &E) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.get("CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = Path::new(DEFAULT_CONFIG_FILE);
    default.exists().then(|| default.to_path_buf())
}

fn read_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Environment lookups against the real process environment
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageBackend;
    use std::collections::HashMap;

    struct MapEnv(HashMap<String, String>);

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }

        fn get_raw(&self, _key: &str) -> Option<String> {
            None
        }
    }

    fn env(pairs: &[(&str, &str)]) -> MapEnv {
        MapEnv(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn explicit_file_then_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.toml");
        std::fs::write(
            &path,
            r#"
            [export]
            table = "code"

            [storage]
            backend = "fs"

            [storage.fs]
            path = "/srv/published"
            "#,
        )
        .unwrap();

        let config = load_with_env(Some(&path), &env(&[("TABLE", "contracts")])).unwrap();
        assert_eq!(config.export.table.as_deref(), Some("contracts"));
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.fs.unwrap().path, "/srv/published");
    }

    #[test]
    fn config_path_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("from-env.toml");
        std::fs::write(&path, "[export]\nskip_publish = true\n").unwrap();

        let config = load_with_env(None, &env(&[("CONFIG", path.to_str().unwrap())])).unwrap();
        assert!(config.export.skip_publish);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_with_env(Some(&dir.path().join("nope.toml")), &env(&[])).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn invalid_result_fails_validation() {
        let err = load_with_env(None, &env(&[("STORAGE_BACKEND", "s3")]));
        assert!(err.is_err());
    }

    #[test]
    fn resolved_config_can_be_fixed_before_validation() {
        let mut config = resolve_with_env(None, &env(&[("STORAGE_BACKEND", "s3")])).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert!(config.validate().is_err());

        config.export.skip_publish = true;
        assert!(config.validate().is_ok());
    }
}

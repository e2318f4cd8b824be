// End-of-run manifest
//
// Records each successfully published file per table, in arrival order, and
// snapshots the mapping with a UTC timestamp once the run is over.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Destination key of the manifest itself
pub const MANIFEST_KEY: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(rename = "dateStr")]
    pub date_str: String,
    pub files: IndexMap<String, Vec<String>>,
}

impl Manifest {
    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the manifest as pretty JSON
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json_pretty().map_err(|e| {
            ExportError::io(path.display(), std::io::Error::other(e))
        })?;
        std::fs::write(path, json).map_err(|e| ExportError::io(path.display(), e))
    }
}

/// Accumulates published destination keys for the whole run
#[derive(Debug, Default)]
pub struct ManifestRecorder {
    files: IndexMap<String, Vec<String>>,
}

impl ManifestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, table_name: &str, destination_key: impl Into<String>) {
        self.files
            .entry(table_name.to_string())
            .or_default()
            .push(destination_key.into());
    }

    pub fn files(&self) -> &IndexMap<String, Vec<String>> {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn finalize(&self) -> Manifest {
        self.finalize_at(Utc::now())
    }

    pub fn finalize_at(&self, now: DateTime<Utc>) -> Manifest {
        Manifest {
            timestamp: now.timestamp_millis(),
            date_str: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            files: self.files.clone(),
        }
    }
}

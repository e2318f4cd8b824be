//! Publication sink abstraction.
//!
//! A sink durably stores a finalized local file under a destination key and
//! removes the local copy once the transfer succeeded. On failure the local
//! file stays where it is so the run can be resumed or inspected.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// A single failed publication
#[derive(Debug, Error)]
#[error("Failed to publish '{}' as '{key}': {reason}", local_path.display())]
pub struct PublishError {
    pub local_path: PathBuf,
    pub key: String,
    pub reason: String,
}

impl PublishError {
    pub fn new(local_path: &Path, key: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            local_path: local_path.to_path_buf(),
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Durable destination for finalized files
#[async_trait]
pub trait PublicationSink: Send + Sync {
    /// Upload `local_path` under `destination_key`, deleting the local file on success
    async fn publish(&self, local_path: &Path, destination_key: &str) -> Result<(), PublishError>;
}

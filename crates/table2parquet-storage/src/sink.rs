// OpenDAL publication sink
//
// Streams a local file to `[prefix]<key>` through an OpenDAL writer in
// fixed-size chunks, then deletes the local copy. Nothing is deleted unless
// the remote writer closed successfully.

use std::path::Path;

use async_trait::async_trait;
use opendal::Operator;
use table2parquet_core::{PublicationSink, PublishError};
use tokio::io::AsyncReadExt;

const UPLOAD_CHUNK_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct ObjectStoreSink {
    operator: Operator,
    prefix: Option<String>,
}

impl std::fmt::Debug for ObjectStoreSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreSink")
            .field("scheme", &self.operator.info().scheme())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreSink {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    fn remote_path(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    async fn upload(&self, local_path: &Path, remote: &str) -> Result<u64, String> {
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| format!("cannot open local file: {}", e))?;
        let mut writer = self
            .operator
            .writer(remote)
            .await
            .map_err(|e| format!("cannot start upload: {}", e))?;

        let mut uploaded = 0u64;
        loop {
            let mut buf = vec![0u8; UPLOAD_CHUNK_BYTES];
            let read = match read_full(&mut file, &mut buf).await {
                Ok(read) => read,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(format!("cannot read local file: {}", e));
                }
            };
            if read == 0 {
                break;
            }
            buf.truncate(read);
            if let Err(e) = writer.write(buf).await {
                let _ = writer.abort().await;
                return Err(format!("upload failed: {}", e));
            }
            uploaded += read as u64;
        }

        writer
            .close()
            .await
            .map_err(|e| format!("cannot complete upload: {}", e))?;
        Ok(uploaded)
    }
}

/// Fill `buf` unless the file ends first
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl PublicationSink for ObjectStoreSink {
    async fn publish(&self, local_path: &Path, destination_key: &str) -> Result<(), PublishError> {
        let remote = self.remote_path(destination_key);
        let bytes = self
            .upload(local_path, &remote)
            .await
            .map_err(|reason| PublishError::new(local_path, destination_key, reason))?;

        tokio::fs::remove_file(local_path).await.map_err(|e| {
            PublishError::new(
                local_path,
                destination_key,
                format!("uploaded but cannot remove local file: {}", e),
            )
        })?;

        tracing::debug!(path = %remote, bytes, "Uploaded file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_operator() -> Operator {
        Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish()
    }

    #[tokio::test]
    async fn publish_uploads_and_removes_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("t_0_8_zstd.parquet");
        std::fs::write(&local, b"PAR1 fake payload PAR1").unwrap();

        let sink = ObjectStoreSink::new(memory_operator());
        sink.publish(&local, "t/t_0_8_zstd.parquet").await.unwrap();

        let stored = sink.operator().read("t/t_0_8_zstd.parquet").await.unwrap();
        assert_eq!(stored.to_vec(), b"PAR1 fake payload PAR1");
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn prefix_is_prepended_to_keys() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("manifest.json");
        std::fs::write(&local, b"{}").unwrap();

        let sink = ObjectStoreSink::new(memory_operator()).with_prefix(Some("exports/".into()));
        sink.publish(&local, "manifest.json").await.unwrap();

        assert!(sink.operator().exists("exports/manifest.json").await.unwrap());
    }

    #[tokio::test]
    async fn large_files_upload_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("big.parquet");
        let payload: Vec<u8> = (0..UPLOAD_CHUNK_BYTES + 1234).map(|i| (i % 251) as u8).collect();
        std::fs::write(&local, &payload).unwrap();

        let sink = ObjectStoreSink::new(memory_operator());
        sink.publish(&local, "t/big.parquet").await.unwrap();

        let stored = sink.operator().read("t/big.parquet").await.unwrap();
        assert_eq!(stored.to_vec(), payload);
    }

    #[tokio::test]
    async fn missing_local_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("missing.parquet");

        let sink = ObjectStoreSink::new(memory_operator());
        let err = sink.publish(&local, "t/missing.parquet").await.unwrap_err();
        assert_eq!(err.key, "t/missing.parquet");
        assert!(err.reason.contains("cannot open local file"));
        assert!(!sink.operator().exists("t/missing.parquet").await.unwrap());
    }
}

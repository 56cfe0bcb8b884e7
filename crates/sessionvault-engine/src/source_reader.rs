use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sessionvault_core::{CoreError, SourceDescriptor, SourceMetadata, SourceReader};

/// Reads bytes and metadata for `SourceKind::Local` sources from the local
/// filesystem, computing a SHA-256 content hash the same way
/// `docx-storage-local::watch::notify_watcher::NotifyWatchBackend::get_metadata_sync`
/// does, so the hash is comparable to what a filesystem watcher would have
/// computed independently.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSourceReader;

impl LocalFileSourceReader {
    pub fn new() -> Self {
        Self
    }

    fn hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl SourceReader for LocalFileSourceReader {
    async fn read_bytes(&self, source: &SourceDescriptor) -> Result<Vec<u8>, CoreError> {
        tokio::fs::read(&source.path)
            .await
            .map_err(|e| CoreError::SourceUnavailable(format!("{}: {e}", source.path)))
    }

    async fn metadata(&self, source: &SourceDescriptor) -> Result<SourceMetadata, CoreError> {
        let meta = tokio::fs::metadata(&source.path)
            .await
            .map_err(|e| CoreError::SourceUnavailable(format!("{}: {e}", source.path)))?;
        let bytes = self.read_bytes(source).await?;
        let modified_at: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(SourceMetadata {
            size_bytes: meta.len(),
            modified_at,
            etag: None,
            version_id: None,
            content_hash: Some(Self::hash(&bytes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionvault_core::SourceKind;
    use tempfile::TempDir;

    fn descriptor(path: &std::path::Path) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::Local,
            connection_id: None,
            path: path.to_string_lossy().to_string(),
            file_id: None,
            auto_sync: true,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn reads_bytes_and_hashes_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        let reader = LocalFileSourceReader::new();
        let source = descriptor(&path);
        let bytes = reader.read_bytes(&source).await.unwrap();
        assert_eq!(bytes, b"hello world");
        let meta = reader.metadata(&source).await.unwrap();
        assert_eq!(meta.size_bytes, 11);
        assert!(meta.content_hash.is_some());
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.bin");
        let reader = LocalFileSourceReader::new();
        let err = reader.read_bytes(&descriptor(&path)).await.unwrap_err();
        assert!(matches!(err, CoreError::SourceUnavailable(_)));
    }
}

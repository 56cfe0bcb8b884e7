use std::sync::Arc;

use sessionvault_core::{Backend, CoreError};
use tracing::instrument;

/// Summary of a checkpoint without its bytes.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub position: u64,
    pub size: u64,
}

/// Position-indexed document snapshots per session, keyed under
/// `{tenant}/sessions/{sid}.ckpt.{position}.bin`, the same filename
/// pattern as `docx-mcp-storage::storage::local`'s
/// `{session_id}.ckpt.{position}.docx`, generalized to an opaque
/// extension since the document format is out of scope here.
pub struct CheckpointStore {
    backend: Arc<dyn Backend>,
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    fn prefix(tenant_id: &str, session_id: &str) -> String {
        format!("{tenant_id}/sessions/{session_id}.ckpt.")
    }

    fn key(tenant_id: &str, session_id: &str, position: u64) -> String {
        format!("{}{}.bin", Self::prefix(tenant_id, session_id), position)
    }

    fn parse_position(key: &str, prefix: &str) -> Option<u64> {
        key.strip_prefix(prefix)?.strip_suffix(".bin")?.parse().ok()
    }

    #[instrument(skip(self, bytes), level = "debug", fields(len = bytes.len()))]
    pub async fn save(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
        bytes: &[u8],
        chunk_size: usize,
    ) -> Result<(), CoreError> {
        let key = Self::key(tenant_id, session_id, position);
        if bytes.len() <= chunk_size {
            self.backend.write(&key, bytes).await
        } else {
            let chunks = bytes.chunks(chunk_size).map(|c| c.to_vec()).collect();
            self.backend.append_stream(&key, chunks).await
        }
    }

    /// Returns the nearest checkpoint with position <= `at_or_before`, or
    /// `None` if no checkpoint exists (the caller falls back to baseline).
    pub async fn load_nearest(
        &self,
        tenant_id: &str,
        session_id: &str,
        at_or_before: u64,
    ) -> Result<Option<(u64, Vec<u8>)>, CoreError> {
        let positions = self.list_positions(tenant_id, session_id).await?;
        let Some(&best) = positions.iter().filter(|&&p| p <= at_or_before).max() else {
            return Ok(None);
        };
        let bytes = self
            .backend
            .read(&Self::key(tenant_id, session_id, best))
            .await?;
        Ok(Some((best, bytes)))
    }

    async fn list_positions(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Vec<u64>, CoreError> {
        let prefix = Self::prefix(tenant_id, session_id);
        let keys = self.backend.list(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|k| Self::parse_position(k, &prefix))
            .collect())
    }

    #[allow(dead_code)]
    pub async fn list(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Vec<CheckpointInfo>, CoreError> {
        let prefix = Self::prefix(tenant_id, session_id);
        let keys = self.backend.list(&prefix).await?;
        let mut out = Vec::new();
        for key in keys {
            let Some(position) = Self::parse_position(&key, &prefix) else {
                continue;
            };
            let bytes = self.backend.read(&key).await?;
            out.push(CheckpointInfo {
                position,
                size: bytes.len() as u64,
            });
        }
        out.sort_by_key(|c| c.position);
        Ok(out)
    }

    pub async fn delete(
        &self,
        tenant_id: &str,
        session_id: &str,
        positions: &[u64],
    ) -> Result<(), CoreError> {
        for &p in positions {
            self.backend
                .delete(&Self::key(tenant_id, session_id, p))
                .await?;
        }
        Ok(())
    }

    pub async fn delete_all(&self, tenant_id: &str, session_id: &str) -> Result<(), CoreError> {
        let positions = self.list_positions(tenant_id, session_id).await?;
        self.delete(tenant_id, session_id, &positions).await
    }
}

use std::sync::Arc;

use sessionvault_core::{Backend, CoreError, WalEntry};
use tracing::{instrument, warn};

/// Per-session append-only log, keyed by `(tenant, session)`.
///
/// Entries are stored newline-delimited JSON under
/// `{tenant}/sessions/{sid}.wal`, grounded on
/// `docx-mcp-storage::storage::local::LocalStorage`'s WAL file format. The
/// `Backend` trait only exposes atomic full-replace `write`, not a true
/// append primitive, so every mutation here is read-modify-write; the
/// backend's per-key atomicity guarantee is what keeps a concurrent reader
/// from observing a torn write.
pub struct Wal {
    backend: Arc<dyn Backend>,
}

impl Wal {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    fn key(tenant_id: &str, session_id: &str) -> String {
        format!("{tenant_id}/sessions/{session_id}.wal")
    }

    /// Parses the WAL blob into entries. A trailing line that fails to
    /// parse is dropped silently (the only way it can occur is an unclean
    /// shutdown mid-append); a non-trailing line that fails to parse is a
    /// genuine `Corruption` error.
    fn parse(bytes: &[u8]) -> Result<Vec<WalEntry>, CoreError> {
        let text = String::from_utf8_lossy(bytes);
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut out = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<WalEntry>(line) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    if i == lines.len() - 1 {
                        warn!("ignoring unparsable trailing WAL line: {e}");
                        break;
                    }
                    return Err(CoreError::Corruption(format!(
                        "WAL entry {i} failed to parse: {e}"
                    )));
                }
            }
        }
        Ok(out)
    }

    fn serialize(entries: &[WalEntry]) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        Ok(buf)
    }

    async fn load_all(&self, tenant_id: &str, session_id: &str) -> Result<Vec<WalEntry>, CoreError> {
        match self.backend.read(&Self::key(tenant_id, session_id)).await {
            Ok(bytes) => Self::parse(&bytes),
            Err(CoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Appends `entries`, server-assigning dense positions starting at
    /// `prev_tip + 1`. Returns the new tip.
    #[instrument(skip(self, entries), level = "debug")]
    pub async fn append(
        &self,
        tenant_id: &str,
        session_id: &str,
        mut entries: Vec<WalEntry>,
    ) -> Result<u64, CoreError> {
        let mut existing = self.load_all(tenant_id, session_id).await?;
        let mut tip = existing.last().map(|e| e.position).unwrap_or(0);
        for entry in &mut entries {
            tip += 1;
            entry.position = tip;
        }
        existing.extend(entries);
        let bytes = Self::serialize(&existing)?;
        self.backend
            .write(&Self::key(tenant_id, session_id), &bytes)
            .await?;
        Ok(tip)
    }

    /// Reads entries with `position > from_position` (a `from_position` of
    /// 0 means from the start), up to `limit` (0 means unlimited).
    pub async fn read(
        &self,
        tenant_id: &str,
        session_id: &str,
        from_position: u64,
        limit: u64,
    ) -> Result<(Vec<WalEntry>, bool), CoreError> {
        let all = self.load_all(tenant_id, session_id).await?;
        let mut matching: Vec<WalEntry> = all
            .into_iter()
            .filter(|e| e.position > from_position)
            .collect();
        if limit == 0 || (matching.len() as u64) <= limit {
            return Ok((matching, false));
        }
        matching.truncate(limit as usize);
        Ok((matching, true))
    }

    /// Discards all entries with `position > keep_from_position`. Idempotent.
    #[instrument(skip(self), level = "debug")]
    pub async fn truncate(
        &self,
        tenant_id: &str,
        session_id: &str,
        keep_from_position: u64,
    ) -> Result<u64, CoreError> {
        let all = self.load_all(tenant_id, session_id).await?;
        let (kept, removed): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|e| e.position <= keep_from_position);
        let bytes = Self::serialize(&kept)?;
        self.backend
            .write(&Self::key(tenant_id, session_id), &bytes)
            .await?;
        Ok(removed.len() as u64)
    }

    /// Returns the current tip (highest stored position), or 0 if the
    /// session has no WAL yet.
    #[allow(dead_code)]
    pub async fn count(&self, tenant_id: &str, session_id: &str) -> Result<u64, CoreError> {
        let all = self.load_all(tenant_id, session_id).await?;
        Ok(all.last().map(|e| e.position).unwrap_or(0))
    }
}

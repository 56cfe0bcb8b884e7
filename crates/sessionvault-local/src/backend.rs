use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sessionvault_core::{Backend, CoreError, HealthStatus, LeaseToken, LockReleaseOutcome};
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Filesystem-backed `Backend`. A key maps directly onto a relative path
/// under `base_dir`; callers are expected to prefix every key with the
/// tenant id (e.g. `{tenant}/sessions/{sid}.wal`), which this backend does
/// not interpret beyond treating it as a path component.
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFile {
    holder_id: String,
    expires_at: chrono::DateTime<Utc>,
}

impl LocalFsBackend {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    fn locks_dir(&self, tenant_id: &str) -> PathBuf {
        self.base_dir.join(tenant_id).join(".locks")
    }

    fn lock_path(&self, tenant_id: &str, resource_id: &str) -> PathBuf {
        self.locks_dir(tenant_id)
            .join(format!("{resource_id}.lock"))
    }

    async fn read_lock(&self, tenant_id: &str, resource_id: &str) -> Option<LockFile> {
        let path = self.lock_path(tenant_id, resource_id);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<LockFile>(&content) {
            Ok(lock) if lock.expires_at > Utc::now() => Some(lock),
            Ok(_) => {
                let _ = fs::remove_file(&path).await;
                None
            }
            Err(e) => {
                warn!("corrupt lock file at {}: {}", path.display(), e);
                let _ = fs::remove_file(&path).await;
                None
            }
        }
    }

    async fn write_lock(
        &self,
        tenant_id: &str,
        resource_id: &str,
        lock: &LockFile,
    ) -> Result<(), CoreError> {
        let dir = self.locks_dir(tenant_id);
        fs::create_dir_all(&dir).await?;
        let path = self.lock_path(tenant_id, resource_id);
        let tmp = path.with_extension("lock.tmp");
        let content = serde_json::to_string(lock)?;
        fs::write(&tmp, &content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalFsBackend {
    fn backend_name(&self) -> &'static str {
        "local-fs"
    }

    #[instrument(skip(self), level = "debug")]
    async fn read(&self, key: &str) -> Result<Vec<u8>, CoreError> {
        let path = self.key_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(CoreError::Io(format!("read {}: {e}", path.display()))),
        }
    }

    #[instrument(skip(self, bytes), level = "debug", fields(len = bytes.len()))]
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CoreError> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    async fn append_stream(&self, key: &str, chunks: Vec<Vec<u8>>) -> Result<(), CoreError> {
        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in chunks {
            bytes.extend(chunk);
        }
        self.write(key, &bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let path = self.key_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Io(format!("delete {}: {e}", path.display()))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        let dir = self.key_path(prefix);
        let parent = if dir.is_dir() {
            dir.clone()
        } else {
            match dir.parent() {
                Some(p) => p.to_path_buf(),
                None => return Ok(vec![]),
            }
        };
        if !parent.exists() {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&parent).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&self.base_dir) else {
                continue;
            };
            let key = rel.to_string_lossy().replace('\\', "/");
            if key.starts_with(prefix) {
                out.push(key);
            }
        }
        out.sort();
        Ok(out)
    }

    async fn exists(&self, key: &str) -> Result<bool, CoreError> {
        Ok(fs::metadata(self.key_path(key)).await.is_ok())
    }

    #[instrument(skip(self), level = "debug")]
    async fn acquire_lock(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LeaseToken, CoreError> {
        if let Some(existing) = self.read_lock(tenant_id, resource_id).await {
            if existing.holder_id != holder_id {
                return Err(CoreError::Contention(format!(
                    "{tenant_id}/{resource_id} held by {} until {}",
                    existing.holder_id, existing.expires_at
                )));
            }
        }
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        let lock = LockFile {
            holder_id: holder_id.to_string(),
            expires_at,
        };
        self.write_lock(tenant_id, resource_id, &lock).await?;
        debug!(
            "acquired lock {tenant_id}/{resource_id} for {holder_id} until {expires_at}"
        );
        Ok(LeaseToken {
            tenant_id: tenant_id.to_string(),
            resource_id: resource_id.to_string(),
            holder_id: holder_id.to_string(),
            expires_at,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn release_lock(&self, lease: &LeaseToken) -> Result<LockReleaseOutcome, CoreError> {
        let path = self.lock_path(&lease.tenant_id, &lease.resource_id);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LockReleaseOutcome::NotFound);
            }
            Err(e) => return Err(CoreError::Io(format!("release lock: {e}"))),
        };
        let existing: LockFile = match serde_json::from_str(&content) {
            Ok(lock) => lock,
            Err(_) => {
                let _ = fs::remove_file(&path).await;
                return Ok(LockReleaseOutcome::NotFound);
            }
        };
        let outcome = if existing.expires_at <= Utc::now() {
            LockReleaseOutcome::Expired
        } else if existing.holder_id != lease.holder_id {
            // Someone else has since acquired it; releasing our stale
            // lease must not disturb the new holder.
            return Ok(LockReleaseOutcome::NotOwner);
        } else {
            LockReleaseOutcome::Released
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(outcome),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LockReleaseOutcome::NotFound),
            Err(e) => Err(CoreError::Io(format!("release lock: {e}"))),
        }
    }

    async fn health_check(&self) -> Result<HealthStatus, CoreError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(HealthStatus {
            healthy: true,
            backend_name: self.backend_name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (LocalFsBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        (LocalFsBackend::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (b, _dir) = backend();
        b.write("tenant-a/sessions/s1.bin", b"hello").await.unwrap();
        let bytes = b.read("tenant-a/sessions/s1.bin").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let (b, _dir) = backend();
        let err = b.read("tenant-a/sessions/missing.bin").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn zero_length_write_is_distinguishable_from_missing() {
        let (b, _dir) = backend();
        b.write("tenant-a/sessions/empty.bin", b"").await.unwrap();
        assert!(b.exists("tenant-a/sessions/empty.bin").await.unwrap());
        let bytes = b.read("tenant-a/sessions/empty.bin").await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (b, _dir) = backend();
        b.delete("tenant-a/sessions/nope.bin").await.unwrap();
        b.write("tenant-a/sessions/s1.bin", b"x").await.unwrap();
        b.delete("tenant-a/sessions/s1.bin").await.unwrap();
        b.delete("tenant-a/sessions/s1.bin").await.unwrap();
        assert!(!b.exists("tenant-a/sessions/s1.bin").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_matching_prefix() {
        let (b, _dir) = backend();
        b.write("tenant-a/sessions/s1.wal", b"1").await.unwrap();
        b.write("tenant-a/sessions/s2.wal", b"2").await.unwrap();
        b.write("tenant-b/sessions/s3.wal", b"3").await.unwrap();
        let keys = b.list("tenant-a/sessions/").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.starts_with("tenant-a/")));
    }

    #[tokio::test]
    async fn lock_acquire_release() {
        let (b, _dir) = backend();
        let ttl = Duration::from_secs(30);
        let lease = b.acquire_lock("t1", "s1", "holder-1", ttl).await.unwrap();
        let err = b
            .acquire_lock("t1", "s1", "holder-2", ttl)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Contention(_)));
        let outcome = b.release_lock(&lease).await.unwrap();
        assert_eq!(outcome, LockReleaseOutcome::Released);
        let lease2 = b.acquire_lock("t1", "s1", "holder-2", ttl).await.unwrap();
        assert_eq!(lease2.holder_id, "holder-2");
    }

    #[tokio::test]
    async fn release_lock_distinguishes_not_found_and_not_owner() {
        let (b, _dir) = backend();
        let ttl = Duration::from_secs(30);
        let stale = b.acquire_lock("t1", "s1", "holder-1", ttl).await.unwrap();
        assert_eq!(
            b.release_lock(&stale).await.unwrap(),
            LockReleaseOutcome::Released
        );
        assert_eq!(
            b.release_lock(&stale).await.unwrap(),
            LockReleaseOutcome::NotFound
        );

        b.acquire_lock("t1", "s1", "holder-2", ttl).await.unwrap();
        assert_eq!(
            b.release_lock(&stale).await.unwrap(),
            LockReleaseOutcome::NotOwner
        );
    }

    #[tokio::test]
    async fn lock_is_reentrant_for_same_holder() {
        let (b, _dir) = backend();
        let ttl = Duration::from_secs(30);
        b.acquire_lock("t1", "s1", "holder-1", ttl).await.unwrap();
        let lease2 = b.acquire_lock("t1", "s1", "holder-1", ttl).await.unwrap();
        assert_eq!(lease2.holder_id, "holder-1");
    }

    #[tokio::test]
    async fn expired_lock_can_be_reclaimed() {
        let (b, _dir) = backend();
        b.acquire_lock("t1", "s1", "holder-1", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let lease = b
            .acquire_lock("t1", "s1", "holder-2", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(lease.holder_id, "holder-2");
    }

    #[tokio::test]
    async fn lock_tenant_isolation() {
        let (b, _dir) = backend();
        let ttl = Duration::from_secs(30);
        b.acquire_lock("tenant-a", "s1", "holder", ttl)
            .await
            .unwrap();
        let lease = b
            .acquire_lock("tenant-b", "s1", "holder", ttl)
            .await
            .unwrap();
        assert_eq!(lease.tenant_id, "tenant-b");
    }

    #[tokio::test]
    async fn health_check_reports_backend_name() {
        let (b, _dir) = backend();
        let health = b.health_check().await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.backend_name, "local-fs");
    }
}

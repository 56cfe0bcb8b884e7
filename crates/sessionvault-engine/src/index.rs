use std::sync::Arc;
use std::time::Duration;

use sessionvault_core::{Backend, CoreError, IndexEntry, IndexPatch, LeaseToken};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Per-tenant manifest of sessions, persisted at
/// `{tenant}/sessions/index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionIndex {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: Vec<IndexEntry>,
}

fn default_version() -> u32 {
    1
}

impl SessionIndex {
    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut IndexEntry> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }
}

/// Mediates all mutation of the per-tenant `SessionIndex` through a
/// lock -> reload -> mutate -> write -> release cycle, grounded on
/// `docx-mcp-storage::storage::local`'s
/// `test_index_concurrent_updates_with_locking` test. A stale in-memory
/// copy of the index is never trusted across an await point: every mutator
/// here re-reads the index after acquiring the lock.
pub struct IndexStore {
    backend: Arc<dyn Backend>,
    lock_ttl: Duration,
}

const MAX_LOCK_ATTEMPTS: u32 = 6;

impl IndexStore {
    pub fn new(backend: Arc<dyn Backend>, lock_ttl: Duration) -> Self {
        Self { backend, lock_ttl }
    }

    fn key(tenant_id: &str) -> String {
        format!("{tenant_id}/sessions/index.json")
    }

    /// Reads the current index without taking the lock, for callers that
    /// only need a point-in-time read (e.g. `list`, `resolve`). Per §5,
    /// readers also take the lock briefly elsewhere when freshness must be
    /// guaranteed; this bare read is used where eventual consistency with a
    /// concurrently in-flight mutation is acceptable.
    pub async fn load(&self, tenant_id: &str) -> Result<SessionIndex, CoreError> {
        match self.backend.read(&Self::key(tenant_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(CoreError::NotFound(_)) => Ok(SessionIndex::default()),
            Err(e) => Err(e),
        }
    }

    /// Acquires the tenant index lock with exponential backoff. Surfaces
    /// `CoreError::Contention` if the lock cannot be acquired within the
    /// retry budget.
    async fn acquire(&self, tenant_id: &str) -> Result<LeaseToken, CoreError> {
        let holder_id = Uuid::new_v4().to_string();
        let mut attempt = 0u32;
        loop {
            match self
                .backend
                .acquire_lock(tenant_id, "index", &holder_id, self.lock_ttl)
                .await
            {
                Ok(lease) => return Ok(lease),
                Err(CoreError::Contention(detail)) => {
                    attempt += 1;
                    if attempt >= MAX_LOCK_ATTEMPTS {
                        return Err(CoreError::Contention(detail));
                    }
                    let backoff = Duration::from_millis(20 * 2u64.pow(attempt));
                    debug!("index lock contended on {tenant_id}, retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Acquires the tenant lock, reloads the index, applies `mutate`,
    /// writes it back, and releases the lock.
    #[instrument(skip(self, mutate), level = "debug")]
    async fn with_lock<F, R>(&self, tenant_id: &str, mutate: F) -> Result<R, CoreError>
    where
        F: FnOnce(&mut SessionIndex) -> Result<R, CoreError>,
    {
        let lease = self.acquire(tenant_id).await?;

        let result = async {
            let mut index = self.load(tenant_id).await?;
            let result = mutate(&mut index)?;
            let bytes = serde_json::to_vec_pretty(&index)?;
            self.backend.write(&Self::key(tenant_id), &bytes).await?;
            Ok(result)
        }
        .await;

        self.backend.release_lock(&lease).await?;
        result
    }

    /// As `with_lock`, but for protocols that need to perform other async
    /// I/O (WAL/checkpoint writes) while holding the index lock, such as
    /// `SessionEngine::append_patch`'s truncate-on-redo-branch step. `body`
    /// receives the freshly-reloaded index and returns the index to persist
    /// alongside its result; the lock is held for `body`'s whole duration,
    /// per §5's requirement that a session's append protocol be serialized
    /// by the tenant index lock.
    pub async fn transact<F, Fut, R>(&self, tenant_id: &str, body: F) -> Result<R, CoreError>
    where
        F: FnOnce(SessionIndex) -> Fut,
        Fut: Future<Output = Result<(SessionIndex, R), CoreError>>,
    {
        let lease = self.acquire(tenant_id).await?;

        let result = async {
            let index = self.load(tenant_id).await?;
            let (index, result) = body(index).await?;
            let bytes = serde_json::to_vec_pretty(&index)?;
            self.backend.write(&Self::key(tenant_id), &bytes).await?;
            Ok(result)
        }
        .await;

        self.backend.release_lock(&lease).await?;
        result
    }

    pub async fn add_session(
        &self,
        tenant_id: &str,
        entry: IndexEntry,
    ) -> Result<(), CoreError> {
        let id = entry.id.clone();
        self.with_lock(tenant_id, move |index| {
            if index.contains(&id) {
                return Err(CoreError::InvariantViolation(format!(
                    "session {id} already present in index"
                )));
            }
            index.sessions.push(entry);
            Ok(())
        })
        .await
    }

    pub async fn update_session(
        &self,
        tenant_id: &str,
        session_id: &str,
        patch: IndexPatch,
    ) -> Result<IndexEntry, CoreError> {
        let session_id = session_id.to_string();
        self.with_lock(tenant_id, move |index| {
            let entry = index
                .get_mut(&session_id)
                .ok_or_else(|| CoreError::NotFound(session_id.clone()))?;
            if let Some(modified_at) = patch.modified_at {
                entry.modified_at = modified_at;
            }
            if let Some(wal_tip) = patch.wal_tip {
                entry.wal_tip = wal_tip;
            }
            if let Some(cursor) = patch.cursor {
                entry.cursor = cursor;
            }
            for p in patch.add_checkpoints {
                entry.checkpoint_positions.insert(p);
            }
            for p in patch.remove_checkpoints {
                entry.checkpoint_positions.remove(&p);
            }
            if let Some(pending) = patch.pending_external_change {
                entry.pending_external_change = pending;
            }
            if let Some(source_path) = patch.source_path {
                entry.source_path = source_path;
            }
            Ok(entry.clone())
        })
        .await
    }

    /// Idempotent; returns whether the session existed.
    pub async fn remove_session(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<bool, CoreError> {
        let session_id = session_id.to_string();
        self.with_lock(tenant_id, move |index| {
            let before = index.sessions.len();
            index.sessions.retain(|s| s.id != session_id);
            Ok(before != index.sessions.len())
        })
        .await
    }

    pub async fn get(&self, tenant_id: &str, session_id: &str) -> Result<IndexEntry, CoreError> {
        let index = self.load(tenant_id).await?;
        index
            .get(session_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<IndexEntry>, CoreError> {
        Ok(self.load(tenant_id).await?.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sessionvault_local::LocalFsBackend;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn index_store() -> (IndexStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(LocalFsBackend::new(dir.path()));
        (IndexStore::new(backend, Duration::from_secs(30)), dir)
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let (store, _dir) = index_store();
        let entry = IndexEntry::new("s1", Utc::now());
        store.add_session("t1", entry).await.unwrap();
        let fetched = store.get("t1", "s1").await.unwrap();
        assert_eq!(fetched.id, "s1");
        assert_eq!(fetched.wal_tip, 0);
    }

    #[tokio::test]
    async fn add_session_duplicate_fails() {
        let (store, _dir) = index_store();
        store
            .add_session("t1", IndexEntry::new("s1", Utc::now()))
            .await
            .unwrap();
        let err = store
            .add_session("t1", IndexEntry::new("s1", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn update_session_applies_only_present_fields() {
        let (store, _dir) = index_store();
        store
            .add_session("t1", IndexEntry::new("s1", Utc::now()))
            .await
            .unwrap();
        let patch = IndexPatch {
            wal_tip: Some(3),
            cursor: Some(3),
            add_checkpoints: BTreeSet::from([3]),
            ..Default::default()
        };
        let updated = store.update_session("t1", "s1", patch).await.unwrap();
        assert_eq!(updated.wal_tip, 3);
        assert_eq!(updated.cursor, 3);
        assert!(updated.checkpoint_positions.contains(&3));
        assert!(!updated.pending_external_change);
    }

    #[tokio::test]
    async fn remove_session_is_idempotent() {
        let (store, _dir) = index_store();
        store
            .add_session("t1", IndexEntry::new("s1", Utc::now()))
            .await
            .unwrap();
        assert!(store.remove_session("t1", "s1").await.unwrap());
        assert!(!store.remove_session("t1", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn tenant_isolation_in_listing() {
        let (store, _dir) = index_store();
        store
            .add_session("tenant-a", IndexEntry::new("s1", Utc::now()))
            .await
            .unwrap();
        store
            .add_session("tenant-b", IndexEntry::new("s2", Utc::now()))
            .await
            .unwrap();
        let a = store.list("tenant-a").await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, "s1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_session_from_many_tasks_all_succeed() {
        use tokio::sync::Barrier;

        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalFsBackend::new(dir.path()));
        let store = Arc::new(IndexStore::new(backend, Duration::from_secs(30)));

        const NUM_TASKS: usize = 10;
        let barrier = Arc::new(Barrier::new(NUM_TASKS));
        let mut handles = Vec::with_capacity(NUM_TASKS);

        for i in 0..NUM_TASKS {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store
                    .add_session("t1", IndexEntry::new(format!("session-{i}"), Utc::now()))
                    .await
                    .expect("add_session should not fail under contention");
            }));
        }

        for handle in handles {
            handle.await.expect("task panicked");
        }

        let sessions = store.list("t1").await.unwrap();
        assert_eq!(sessions.len(), NUM_TASKS);
    }
}

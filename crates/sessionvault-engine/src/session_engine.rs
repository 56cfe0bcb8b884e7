use std::sync::Arc;

use chrono::Utc;
use sessionvault_core::{
    Backend, CoreError, EditReplayer, IndexEntry, IndexPatch, SourceDescriptor, SyncMeta,
    WalEntry, WalEntryKind,
};
use tracing::{instrument, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::index::IndexStore;
use crate::wal::Wal;

/// Result of an `undo`/`redo`/`jump_to` call.
#[derive(Debug, Clone)]
pub struct CursorMove {
    pub new_cursor: u64,
    pub steps_moved: u64,
    pub status_message: String,
}

/// A page of WAL history.
#[derive(Debug, Clone)]
pub struct History {
    pub entries: Vec<WalEntry>,
    pub has_more: bool,
}

/// Orchestrates append, undo, redo, jump, and compact for one tenant's
/// sessions, owning the cursor invariant (I1-I7). Stateless across calls:
/// every operation re-derives what it needs from the Backend.
pub struct SessionEngine {
    backend: Arc<dyn Backend>,
    wal: Wal,
    checkpoints: CheckpointStore,
    pub(crate) index: IndexStore,
    replayer: Arc<dyn EditReplayer>,
    config: Config,
}

fn baseline_key(tenant_id: &str, session_id: &str) -> String {
    format!("{tenant_id}/sessions/{session_id}.bin")
}

impl SessionEngine {
    pub fn new(
        backend: Arc<dyn Backend>,
        replayer: Arc<dyn EditReplayer>,
        config: Config,
    ) -> Self {
        Self {
            wal: Wal::new(backend.clone()),
            checkpoints: CheckpointStore::new(backend.clone()),
            index: IndexStore::new(backend.clone(), config.lock_ttl),
            backend,
            replayer,
            config,
        }
    }

    /// Creates a session with an empty baseline document.
    #[instrument(skip(self), level = "debug")]
    pub async fn create_empty(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<IndexEntry, CoreError> {
        self.open_from_bytes(tenant_id, session_id, Vec::new(), None)
            .await
    }

    /// Creates a session whose baseline is `bytes`, optionally remembering
    /// `source` so `ExternalReconciler` can later detect drift.
    #[instrument(skip(self, bytes), level = "debug", fields(len = bytes.len()))]
    pub async fn open_from_bytes(
        &self,
        tenant_id: &str,
        session_id: &str,
        bytes: Vec<u8>,
        source: Option<SourceDescriptor>,
    ) -> Result<IndexEntry, CoreError> {
        self.backend
            .write(&baseline_key(tenant_id, session_id), &bytes)
            .await?;
        let now = Utc::now();
        let mut entry = IndexEntry::new(session_id, now);
        entry.source_path = source.map(|s| s.path);
        self.index.add_session(tenant_id, entry.clone()).await?;
        Ok(entry)
    }

    /// Equivalent to `open_from_bytes`, for a caller that has already read
    /// the external file's bytes (reading the source itself is a
    /// `SourceReader` concern, not the engine's).
    pub async fn open_file(
        &self,
        tenant_id: &str,
        session_id: &str,
        source: SourceDescriptor,
        bytes: Vec<u8>,
    ) -> Result<IndexEntry, CoreError> {
        self.open_from_bytes(tenant_id, session_id, bytes, Some(source))
            .await
    }

    /// Resolves a session id or a source path to the owning index entry.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        id_or_path: &str,
    ) -> Result<IndexEntry, CoreError> {
        let index = self.index.load(tenant_id).await?;
        if let Some(entry) = index.get(id_or_path) {
            return Ok(entry.clone());
        }
        index
            .sessions
            .into_iter()
            .find(|e| e.source_path.as_deref() == Some(id_or_path))
            .ok_or_else(|| CoreError::NotFound(id_or_path.to_string()))
    }

    /// Materializes the document at `target_position`: nearest checkpoint
    /// at or before it, plus WAL replay up to and including it. Stateless;
    /// implements §4.5.1 / the `rebuild_at` shared by undo/redo/jump/get.
    async fn rebuild_document(
        &self,
        tenant_id: &str,
        session_id: &str,
        target_position: u64,
    ) -> Result<Vec<u8>, CoreError> {
        let (start, mut document) = match self
            .checkpoints
            .load_nearest(tenant_id, session_id, target_position)
            .await?
        {
            Some((position, bytes)) => (position, bytes),
            None => (
                0,
                self.backend.read(&baseline_key(tenant_id, session_id)).await?,
            ),
        };

        let (entries, _) = self.wal.read(tenant_id, session_id, start, 0).await?;
        for entry in entries.into_iter().filter(|e| e.position <= target_position) {
            match entry.kind {
                WalEntryKind::Patch => {
                    if let Err(e) = self.replayer.apply(&mut document, &entry.payload).await {
                        warn!(
                            "replay failed at position {} for {tenant_id}/{session_id}: {e}; \
                             returning best-effort materialization",
                            entry.position
                        );
                        break;
                    }
                }
                WalEntryKind::ExternalSync | WalEntryKind::Import => {
                    if let Some(meta) = entry.sync_meta {
                        document = meta.document_snapshot;
                    }
                }
            }
        }
        Ok(document)
    }

    /// Reads the current visible document at the session's cursor.
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Vec<u8>, CoreError> {
        let entry = self.index.get(tenant_id, session_id).await?;
        self.rebuild_document(tenant_id, session_id, entry.cursor)
            .await
    }

    /// Appends a patch at the cursor, per §4.5.2: truncates any forfeited
    /// redo branch, appends the WAL entry, writes a checkpoint at the new
    /// tip unconditionally, and commits the index update atomically.
    #[instrument(skip(self, description, patch_payload, current_document_bytes), level = "debug")]
    pub async fn append_patch(
        &self,
        tenant_id: &str,
        session_id: &str,
        description: impl Into<String>,
        patch_payload: Vec<u8>,
        current_document_bytes: Vec<u8>,
    ) -> Result<IndexEntry, CoreError> {
        let description = description.into();
        let chunk_size = self.config.checkpoint_chunk_size;
        let new_entry = self
            .index
            .transact(tenant_id, move |index| {
                let wal = &self.wal;
                let checkpoints = &self.checkpoints;
                async move {
                    let mut index = index;
                    let Some(entry) = index.sessions.iter_mut().find(|s| s.id == session_id)
                    else {
                        return Err(CoreError::NotFound(session_id.to_string()));
                    };
                    if entry.pending_external_change {
                        return Err(CoreError::EditsBlocked(format!(
                            "session {session_id} has an unacknowledged external change"
                        )));
                    }
                    let cursor = entry.cursor;
                    let wal_tip = entry.wal_tip;

                    if cursor < wal_tip {
                        wal.truncate(tenant_id, session_id, cursor).await?;
                        let discarded: Vec<u64> = entry
                            .checkpoint_positions
                            .iter()
                            .copied()
                            .filter(|p| *p > cursor)
                            .collect();
                        checkpoints.delete(tenant_id, session_id, &discarded).await?;
                        entry.checkpoint_positions.retain(|p| *p <= cursor);
                    }

                    let patch_entry = WalEntry {
                        position: 0,
                        kind: WalEntryKind::Patch,
                        timestamp: Utc::now(),
                        description: description.clone(),
                        payload: patch_payload.clone(),
                        sync_meta: None,
                    };
                    let new_tip = wal.append(tenant_id, session_id, vec![patch_entry]).await?;
                    checkpoints
                        .save(
                            tenant_id,
                            session_id,
                            new_tip,
                            &current_document_bytes,
                            chunk_size,
                        )
                        .await?;

                    entry.wal_tip = new_tip;
                    entry.cursor = new_tip;
                    entry.checkpoint_positions.insert(new_tip);
                    entry.modified_at = Utc::now();
                    let updated = entry.clone();
                    Ok((index, updated))
                }
            })
            .await?;

        if new_entry.wal_tip >= self.config.wal_compact_threshold {
            if let Err(e) = self.compact(tenant_id, session_id, false).await {
                warn!("post-append compaction of {tenant_id}/{session_id} skipped: {e}");
            }
        }

        Ok(new_entry)
    }

    /// Shared by `undo`/`redo`/`jump_to`: rebuilds the document at `target`,
    /// writes an accelerating checkpoint there, and moves the cursor.
    async fn rebuild_at(
        &self,
        tenant_id: &str,
        session_id: &str,
        target: u64,
    ) -> Result<CursorMove, CoreError> {
        let entry = self.index.get(tenant_id, session_id).await?;
        let target = target.min(entry.wal_tip);
        if target == entry.cursor {
            return Ok(CursorMove {
                new_cursor: entry.cursor,
                steps_moved: 0,
                status_message: "already at target position".to_string(),
            });
        }

        let document = self.rebuild_document(tenant_id, session_id, target).await?;
        self.checkpoints
            .save(
                tenant_id,
                session_id,
                target,
                &document,
                self.config.checkpoint_chunk_size,
            )
            .await?;

        let steps_moved = entry.cursor.abs_diff(target);
        self.index
            .update_session(
                tenant_id,
                session_id,
                IndexPatch {
                    cursor: Some(target),
                    add_checkpoints: std::iter::once(target).collect(),
                    modified_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        Ok(CursorMove {
            new_cursor: target,
            steps_moved,
            status_message: format!("moved to position {target}"),
        })
    }

    pub async fn undo(
        &self,
        tenant_id: &str,
        session_id: &str,
        steps: u64,
    ) -> Result<CursorMove, CoreError> {
        let entry = self.index.get(tenant_id, session_id).await?;
        let target = entry.cursor.saturating_sub(steps.min(entry.cursor));
        self.rebuild_at(tenant_id, session_id, target).await
    }

    pub async fn redo(
        &self,
        tenant_id: &str,
        session_id: &str,
        steps: u64,
    ) -> Result<CursorMove, CoreError> {
        let entry = self.index.get(tenant_id, session_id).await?;
        let remaining = entry.wal_tip - entry.cursor;
        let target = entry.cursor + steps.min(remaining);
        self.rebuild_at(tenant_id, session_id, target).await
    }

    pub async fn jump_to(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<CursorMove, CoreError> {
        self.rebuild_at(tenant_id, session_id, position).await
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        session_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<History, CoreError> {
        let (entries, has_more) = self.wal.read(tenant_id, session_id, offset, limit).await?;
        Ok(History { entries, has_more })
    }

    /// §4.5.4: collapses all history into the baseline. If there is redo
    /// history pending and `discard_redo` is false, this is a normal,
    /// caller-triggerable refusal per §4.5.4 ("refuse, log, return") rather
    /// than a bug: it logs and returns the entry unchanged.
    #[instrument(skip(self), level = "debug")]
    pub async fn compact(
        &self,
        tenant_id: &str,
        session_id: &str,
        discard_redo: bool,
    ) -> Result<IndexEntry, CoreError> {
        let entry = self.index.get(tenant_id, session_id).await?;
        if entry.cursor < entry.wal_tip && !discard_redo {
            warn!(
                "refusing to compact {tenant_id}/{session_id}: cursor {} < tip {} and discard_redo is false",
                entry.cursor, entry.wal_tip
            );
            return Ok(entry);
        }

        let document = self
            .rebuild_document(tenant_id, session_id, entry.cursor)
            .await?;
        self.backend
            .write(&baseline_key(tenant_id, session_id), &document)
            .await?;
        self.wal.truncate(tenant_id, session_id, 0).await?;
        self.checkpoints.delete_all(tenant_id, session_id).await?;

        self.index
            .update_session(
                tenant_id,
                session_id,
                IndexPatch {
                    wal_tip: Some(0),
                    cursor: Some(0),
                    remove_checkpoints: entry.checkpoint_positions.clone(),
                    modified_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Writes an `ExternalSync`/`Import` WAL entry carrying a full
    /// snapshot, following the same protocol as `append_patch` but using
    /// the snapshot itself as the checkpoint (no replay needed).
    #[instrument(skip(self, new_bytes, sync_meta), level = "debug")]
    pub async fn append_external_sync(
        &self,
        tenant_id: &str,
        session_id: &str,
        kind: WalEntryKind,
        sync_meta: SyncMeta,
        new_bytes: Vec<u8>,
    ) -> Result<IndexEntry, CoreError> {
        debug_assert!(matches!(kind, WalEntryKind::ExternalSync | WalEntryKind::Import));
        let chunk_size = self.config.checkpoint_chunk_size;
        self.index
            .transact(tenant_id, move |index| {
                let wal = &self.wal;
                let checkpoints = &self.checkpoints;
                async move {
                    let mut index = index;
                    let Some(entry) = index.sessions.iter_mut().find(|s| s.id == session_id)
                    else {
                        return Err(CoreError::NotFound(session_id.to_string()));
                    };

                    let cursor = entry.cursor;
                    let wal_tip = entry.wal_tip;
                    if cursor < wal_tip {
                        wal.truncate(tenant_id, session_id, cursor).await?;
                        let discarded: Vec<u64> = entry
                            .checkpoint_positions
                            .iter()
                            .copied()
                            .filter(|p| *p > cursor)
                            .collect();
                        checkpoints.delete(tenant_id, session_id, &discarded).await?;
                        entry.checkpoint_positions.retain(|p| *p <= cursor);
                    }

                    let description = format!("external sync of {}", sync_meta.source_path);
                    let sync_entry = WalEntry {
                        position: 0,
                        kind,
                        timestamp: Utc::now(),
                        description,
                        payload: Vec::new(),
                        sync_meta: Some(sync_meta),
                    };
                    let new_tip = wal.append(tenant_id, session_id, vec![sync_entry]).await?;
                    checkpoints
                        .save(tenant_id, session_id, new_tip, &new_bytes, chunk_size)
                        .await?;

                    entry.wal_tip = new_tip;
                    entry.cursor = new_tip;
                    entry.checkpoint_positions.insert(new_tip);
                    entry.pending_external_change = false;
                    entry.modified_at = Utc::now();
                    let updated = entry.clone();
                    Ok((index, updated))
                }
            })
            .await
    }

    pub async fn set_source_path(
        &self,
        tenant_id: &str,
        session_id: &str,
        path: Option<String>,
    ) -> Result<IndexEntry, CoreError> {
        self.index
            .update_session(
                tenant_id,
                session_id,
                IndexPatch {
                    source_path: Some(path),
                    modified_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
    }

    /// Destroys a session: its baseline, WAL, checkpoints, and index entry.
    /// Sessions are never destroyed automatically.
    #[instrument(skip(self), level = "debug")]
    pub async fn close(&self, tenant_id: &str, session_id: &str) -> Result<bool, CoreError> {
        self.checkpoints.delete_all(tenant_id, session_id).await?;
        self.wal.truncate(tenant_id, session_id, 0).await?;
        self.backend
            .delete(&baseline_key(tenant_id, session_id))
            .await?;
        self.index.remove_session(tenant_id, session_id).await
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<IndexEntry>, CoreError> {
        self.index.list(tenant_id).await
    }

    #[allow(dead_code)]
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::WholeDocumentReplayer;
    use sessionvault_local::LocalFsBackend;
    use tempfile::TempDir;

    fn engine() -> (SessionEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalFsBackend::new(dir.path()));
        let replayer: Arc<dyn EditReplayer> = Arc::new(WholeDocumentReplayer);
        (SessionEngine::new(backend, replayer, Config::default()), dir)
    }

    #[tokio::test]
    async fn redo_after_undo_restores_cursor_and_document() {
        let (engine, _dir) = engine();
        engine.create_empty("t1", "s1").await.unwrap();
        engine
            .append_patch("t1", "s1", "first", b"v1".to_vec(), b"v1".to_vec())
            .await
            .unwrap();
        let after_second = engine
            .append_patch("t1", "s1", "second", b"v2".to_vec(), b"v2".to_vec())
            .await
            .unwrap();

        engine.undo("t1", "s1", 1).await.unwrap();
        let undone_document = engine.get("t1", "s1").await.unwrap();
        assert_eq!(undone_document, b"v1");

        let redo_move = engine.redo("t1", "s1", 1).await.unwrap();
        assert_eq!(redo_move.new_cursor, after_second.cursor);
        let redone_document = engine.get("t1", "s1").await.unwrap();
        assert_eq!(redone_document, b"v2");
    }

    #[tokio::test]
    async fn compact_with_pending_redo_is_refused_not_aborted() {
        let (engine, _dir) = engine();
        engine.create_empty("t1", "s1").await.unwrap();
        engine
            .append_patch("t1", "s1", "first", b"v1".to_vec(), b"v1".to_vec())
            .await
            .unwrap();
        engine
            .append_patch("t1", "s1", "second", b"v2".to_vec(), b"v2".to_vec())
            .await
            .unwrap();
        engine.undo("t1", "s1", 1).await.unwrap();

        let before = engine.index.get("t1", "s1").await.unwrap();
        assert!(before.cursor < before.wal_tip);

        let refused = engine.compact("t1", "s1", false).await.unwrap();
        assert_eq!(refused.cursor, before.cursor);
        assert_eq!(refused.wal_tip, before.wal_tip);

        let after = engine.index.get("t1", "s1").await.unwrap();
        assert_eq!(after.wal_tip, before.wal_tip);
        assert_eq!(after.cursor, before.cursor);
    }

    #[tokio::test]
    async fn compact_with_discard_redo_collapses_history() {
        let (engine, _dir) = engine();
        engine.create_empty("t1", "s1").await.unwrap();
        engine
            .append_patch("t1", "s1", "first", b"v1".to_vec(), b"v1".to_vec())
            .await
            .unwrap();
        engine
            .append_patch("t1", "s1", "second", b"v2".to_vec(), b"v2".to_vec())
            .await
            .unwrap();
        engine.undo("t1", "s1", 1).await.unwrap();

        let compacted = engine.compact("t1", "s1", true).await.unwrap();
        assert_eq!(compacted.wal_tip, 0);
        assert_eq!(compacted.cursor, 0);
        assert_eq!(engine.get("t1", "s1").await.unwrap(), b"v1");
    }
}

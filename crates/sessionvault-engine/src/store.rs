use std::sync::Arc;

use sessionvault_core::{
    Backend, CoreError, EditReplayer, IndexEntry, PendingExternalChange, SourceDescriptor,
    SourceKind, SourceReader,
};

use crate::config::Config;
use crate::reconciler::{ExternalReconciler, SyncOutcome};
use crate::session_engine::{CursorMove, History, SessionEngine};

/// The single entry point this crate exposes: composes `SessionEngine`
/// (append/undo/redo/jump/compact) with `ExternalReconciler` (external
/// change detection and sync) behind one facade, mirroring the way
/// `docx-mcp-storage::storage::StorageService` wraps its backend and lock
/// manager behind one constructor.
pub struct SessionStore {
    engine: Arc<SessionEngine>,
    reconciler: ExternalReconciler,
}

impl SessionStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        replayer: Arc<dyn EditReplayer>,
        config: Config,
    ) -> Self {
        let debounce = config.debounce;
        let engine = Arc::new(SessionEngine::new(backend, replayer, config));
        let reconciler = ExternalReconciler::new(engine.clone(), debounce);
        Self { engine, reconciler }
    }

    /// Registers the reader used to pull bytes/metadata for sources of
    /// `kind`. Must be called for every `SourceKind` a caller intends to
    /// open sessions against before `check_for_changes`/`sync` is used for
    /// that kind.
    pub fn with_source_reader(mut self, kind: SourceKind, reader: Arc<dyn SourceReader>) -> Self {
        self.reconciler.register_reader(kind, reader);
        self
    }

    pub async fn create_empty(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<IndexEntry, CoreError> {
        self.engine.create_empty(tenant_id, session_id).await
    }

    pub async fn open_from_bytes(
        &self,
        tenant_id: &str,
        session_id: &str,
        bytes: Vec<u8>,
        source: Option<SourceDescriptor>,
    ) -> Result<IndexEntry, CoreError> {
        self.engine
            .open_from_bytes(tenant_id, session_id, bytes, source)
            .await
    }

    pub async fn open_file(
        &self,
        tenant_id: &str,
        session_id: &str,
        source: SourceDescriptor,
        bytes: Vec<u8>,
    ) -> Result<IndexEntry, CoreError> {
        self.engine.open_file(tenant_id, session_id, source, bytes).await
    }

    pub async fn resolve(&self, tenant_id: &str, id_or_path: &str) -> Result<IndexEntry, CoreError> {
        self.engine.resolve(tenant_id, id_or_path).await
    }

    pub async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Vec<u8>, CoreError> {
        self.engine.get(tenant_id, session_id).await
    }

    pub async fn append_patch(
        &self,
        tenant_id: &str,
        session_id: &str,
        description: impl Into<String>,
        patch_payload: Vec<u8>,
        current_document_bytes: Vec<u8>,
    ) -> Result<IndexEntry, CoreError> {
        self.engine
            .append_patch(
                tenant_id,
                session_id,
                description,
                patch_payload,
                current_document_bytes,
            )
            .await
    }

    pub async fn undo(
        &self,
        tenant_id: &str,
        session_id: &str,
        steps: u64,
    ) -> Result<CursorMove, CoreError> {
        self.engine.undo(tenant_id, session_id, steps).await
    }

    pub async fn redo(
        &self,
        tenant_id: &str,
        session_id: &str,
        steps: u64,
    ) -> Result<CursorMove, CoreError> {
        self.engine.redo(tenant_id, session_id, steps).await
    }

    pub async fn jump_to(
        &self,
        tenant_id: &str,
        session_id: &str,
        position: u64,
    ) -> Result<CursorMove, CoreError> {
        self.engine.jump_to(tenant_id, session_id, position).await
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        session_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<History, CoreError> {
        self.engine.history(tenant_id, session_id, offset, limit).await
    }

    pub async fn compact(
        &self,
        tenant_id: &str,
        session_id: &str,
        discard_redo: bool,
    ) -> Result<IndexEntry, CoreError> {
        self.engine.compact(tenant_id, session_id, discard_redo).await
    }

    pub async fn set_source_path(
        &self,
        tenant_id: &str,
        session_id: &str,
        path: Option<String>,
    ) -> Result<IndexEntry, CoreError> {
        self.engine.set_source_path(tenant_id, session_id, path).await
    }

    pub async fn close(&self, tenant_id: &str, session_id: &str) -> Result<bool, CoreError> {
        self.engine.close(tenant_id, session_id).await
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<IndexEntry>, CoreError> {
        self.engine.list(tenant_id).await
    }

    /// Notifies the reconciler of an externally observed change, subject to
    /// the configured debounce window.
    pub async fn on_external_change_notification(
        &self,
        tenant_id: &str,
        session_id: &str,
        source: &SourceDescriptor,
    ) -> Result<Option<PendingExternalChange>, CoreError> {
        self.reconciler
            .on_external_change_notification(tenant_id, session_id, source)
            .await
    }

    pub async fn check_for_changes(
        &self,
        tenant_id: &str,
        session_id: &str,
        source: &SourceDescriptor,
    ) -> Result<Option<PendingExternalChange>, CoreError> {
        self.reconciler
            .check_for_changes(tenant_id, session_id, source)
            .await
    }

    pub async fn sync(
        &self,
        tenant_id: &str,
        session_id: &str,
        source: &SourceDescriptor,
    ) -> Result<SyncOutcome, CoreError> {
        self.reconciler.sync(tenant_id, session_id, source).await
    }

    pub async fn acknowledge(&self, tenant_id: &str, session_id: &str) -> Result<(), CoreError> {
        self.reconciler.acknowledge(tenant_id, session_id).await
    }

    pub fn pending_change(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Option<PendingExternalChange> {
        self.reconciler.pending_change(tenant_id, session_id)
    }
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryKind {
    Patch,
    ExternalSync,
    Import,
}

/// An append-only WAL record. Positions are a dense 1-based sequence
/// assigned by the backend at append time.
///
/// `payload` carries the logical edit operation for `Patch` entries; for
/// `ExternalSync`/`Import` it carries a diff summary plus a full
/// materialized snapshot in `sync_meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub position: u64,
    pub kind: WalEntryKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_meta: Option<SyncMeta>,
}

/// Per-session manifest entry, stored inside the per-tenant `Index`. This is
/// the unit of edit history: id, baseline location (derived from `id` and
/// tenant), source path, and the cursor/tip pair that together gate
/// undo/redo and edit acceptance.
///
/// Mirrors `docx_storage_core::storage::SessionIndexEntry` but keeps
/// `wal_tip` and `cursor` as two distinct fields (rather than the single
/// `wal_position` the divergent local-storage copy uses), since undo/redo
/// correctness depends on the two being independently addressable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(alias = "last_modified_at")]
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub wal_tip: u64,
    #[serde(default)]
    pub cursor: u64,
    #[serde(default)]
    pub checkpoint_positions: BTreeSet<u64>,
    #[serde(default)]
    pub pending_external_change: bool,
}

impl IndexEntry {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            source_path: None,
            created_at: now,
            modified_at: now,
            wal_tip: 0,
            cursor: 0,
            checkpoint_positions: BTreeSet::new(),
            pending_external_change: false,
        }
    }
}

/// A partial update to an `IndexEntry`; only present fields are applied.
#[derive(Debug, Clone, Default)]
pub struct IndexPatch {
    pub modified_at: Option<DateTime<Utc>>,
    pub wal_tip: Option<u64>,
    pub cursor: Option<u64>,
    pub add_checkpoints: BTreeSet<u64>,
    pub remove_checkpoints: BTreeSet<u64>,
    pub pending_external_change: Option<bool>,
    pub source_path: Option<Option<String>>,
}

/// Diff summary attached to an `ExternalSync`/`Import` WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMeta {
    pub source_path: String,
    pub previous_content_hash: String,
    pub new_content_hash: String,
    pub summary: SyncSummary,
    #[serde(default)]
    pub uncovered_changes: Vec<UncoveredChange>,
    #[serde(with = "serde_bytes")]
    pub document_snapshot: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
    pub moved: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncoveredChange {
    pub kind: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_uri: Option<String>,
}

/// Where the authoritative external copy of a session's document lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Local,
    GoogleDrive,
    OneDrive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(rename = "type", default)]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SourceMetadata>,
}

fn default_true() -> bool {
    true
}

/// Latest known metadata for a source, used to cheaply detect external
/// modification without reading the full source bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Transient, process-local record of an unacknowledged external change.
/// Held per `(tenant_id, session_id)` by the `ExternalReconciler`; not
/// persisted. The boolean projection of this (`pending_external_change`)
/// is persisted in the `IndexEntry` so the *gate* survives a restart, even
/// though the richer summary here does not.
#[derive(Debug, Clone)]
pub struct PendingExternalChange {
    pub session_id: String,
    pub detected_at: DateTime<Utc>,
    pub source_path: String,
    pub summary: SyncSummary,
    pub change_id: String,
}

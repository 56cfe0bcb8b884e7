//! Core traits and types for versioned, multi-tenant document session storage.
//!
//! This crate defines the abstractions shared between the storage backend
//! implementation and the orchestration layer that owns cursor/undo/redo
//! semantics:
//! - `Backend`: byte-blob store, atomic key-value index, distributed locks
//! - `EditReplayer`: applies a logical patch to a materialized document
//! - `SourceReader`: reads bytes/metadata from an external source
//! - the index entry, WAL entry, and source descriptor data model

mod backend;
mod error;
mod model;
mod replay;
mod source;

pub use backend::{Backend, DEFAULT_CHUNK_SIZE, HealthStatus, LeaseToken, LockReleaseOutcome};
pub use error::CoreError;
pub use model::{
    IndexEntry, IndexPatch, PendingExternalChange, SourceDescriptor, SourceKind, SourceMetadata,
    SyncMeta, SyncSummary, UncoveredChange, WalEntry, WalEntryKind,
};
pub use replay::EditReplayer;
pub use source::SourceReader;

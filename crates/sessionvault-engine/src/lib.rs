//! Orchestration layer on top of `sessionvault-core`'s `Backend`: write-ahead
//! log, checkpoints, the per-tenant session index, undo/redo/jump/compact,
//! and external-source reconciliation.

mod checkpoint;
mod config;
mod index;
mod reconciler;
mod replay;
mod session_engine;
mod source_reader;
mod store;
mod wal;

pub use config::Config;
pub use reconciler::{ExternalReconciler, SyncOutcome};
pub use replay::WholeDocumentReplayer;
pub use session_engine::{CursorMove, History, SessionEngine};
pub use source_reader::LocalFileSourceReader;
pub use store::SessionStore;

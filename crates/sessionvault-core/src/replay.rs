use async_trait::async_trait;

use crate::error::CoreError;

/// Applies a document-format-specific logical patch to a materialized
/// document. Supplied externally: the document format and its edit
/// semantics are out of scope for this crate; this trait is the seam.
///
/// Replay failures are non-fatal to the caller: `SessionEngine::get` stops
/// replay at the first failing entry and returns the best-effort
/// materialization rather than propagating the error (principle of maximum
/// useful recovery).
#[async_trait]
pub trait EditReplayer: Send + Sync {
    /// Mutates `document` in place by applying `patch_payload`.
    async fn apply(&self, document: &mut Vec<u8>, patch_payload: &[u8]) -> Result<(), CoreError>;
}

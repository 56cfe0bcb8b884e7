use async_trait::async_trait;
use sessionvault_core::{CoreError, EditReplayer};

/// A trivial `EditReplayer` whose patches are complete replacement
/// documents: `apply` simply overwrites the document with `patch_payload`.
///
/// Real, format-aware patch application is out of scope for this crate (the
/// document format itself is an external collaborator, per §1); this
/// implementation exists so the engine's own test suite can exercise
/// undo/redo/compact without depending on one.
#[derive(Debug, Clone, Default)]
pub struct WholeDocumentReplayer;

impl WholeDocumentReplayer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EditReplayer for WholeDocumentReplayer {
    async fn apply(&self, document: &mut Vec<u8>, patch_payload: &[u8]) -> Result<(), CoreError> {
        document.clear();
        document.extend_from_slice(patch_payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_replaces_document_contents() {
        let replayer = WholeDocumentReplayer::new();
        let mut document = b"old".to_vec();
        replayer.apply(&mut document, b"new").await.unwrap();
        assert_eq!(document, b"new");
    }
}

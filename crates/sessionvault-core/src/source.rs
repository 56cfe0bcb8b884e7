use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{SourceDescriptor, SourceMetadata};

/// Reads bytes and metadata from an external source on behalf of the
/// `ExternalReconciler`. Dispatched by `SourceKind` tag, not by trait
/// inheritance; a caller supplies one `SourceReader` per kind it wants to
/// support. Reading from cloud sources (SharePoint, OneDrive) requires SDKs
/// that are out of scope for this crate; only a local-filesystem reader
/// ships by default.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Reads the full current bytes of `source`.
    async fn read_bytes(&self, source: &SourceDescriptor) -> Result<Vec<u8>, CoreError>;

    /// Cheaply fetches current metadata without reading full bytes, when
    /// the underlying source supports it.
    async fn metadata(&self, source: &SourceDescriptor) -> Result<SourceMetadata, CoreError>;
}

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default chunk boundary for streamed blob I/O (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// A held distributed lock. Opaque to callers beyond the fields needed to
/// release or renew it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseToken {
    pub tenant_id: String,
    pub resource_id: String,
    pub holder_id: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub backend_name: String,
    pub version: String,
}

/// Structured outcome of `release_lock`, distinguishing "someone else holds
/// it now" from "it was already gone" rather than collapsing both into a
/// bare success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReleaseOutcome {
    /// Released by its current holder.
    Released,
    /// A different holder now owns the lock; this call did not disturb it.
    NotOwner,
    /// No lock file was present.
    NotFound,
    /// A lock file was present but had already expired and was cleared.
    Expired,
}

/// Abstraction over a byte-blob store, an atomic key-value index, and a
/// distributed lock manager, scoped per tenant.
///
/// Every key a caller passes is expected to already carry the tenant prefix
/// (e.g. `{tenant}/sessions/{sid}.wal`); the `Backend` itself enforces
/// nothing about key shape beyond treating each key as an opaque string.
/// Concurrency contract: two concurrent writes to the same key serialize to
/// one winning order; readers always observe a fully-written prior version,
/// never a torn write.
#[async_trait]
pub trait Backend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Reads the full bytes at `key`. A zero-length blob is legal and
    /// distinguishable from `CoreError::NotFound`.
    async fn read(&self, key: &str) -> Result<Vec<u8>, CoreError>;

    /// Atomically replaces the bytes at `key`.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CoreError>;

    /// Streams `chunks` into `key`, for large checkpoints/snapshots. The
    /// write is atomic from a reader's perspective: no reader ever observes
    /// a partial prefix of the stream.
    async fn append_stream(&self, key: &str, chunks: Vec<Vec<u8>>) -> Result<(), CoreError>;

    /// Idempotent delete; succeeds whether or not `key` existed.
    async fn delete(&self, key: &str) -> Result<(), CoreError>;

    /// Lists all keys with the given prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, CoreError>;

    async fn exists(&self, key: &str) -> Result<bool, CoreError>;

    /// Attempts to acquire a distributed mutex on `(tenant_id, resource_id)`
    /// for `holder_id`, valid until `ttl` elapses. Re-entrant for the
    /// current holder (renews in place). Returns `CoreError::Contention` if
    /// held by a different holder.
    async fn acquire_lock(
        &self,
        tenant_id: &str,
        resource_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LeaseToken, CoreError>;

    /// Idempotent; safe to call after the lease has already expired. Reports
    /// which of those cases occurred via `LockReleaseOutcome` rather than a
    /// bare boolean, so a caller chasing a contention bug can tell "someone
    /// else already grabbed it" apart from "it was already gone."
    async fn release_lock(&self, lease: &LeaseToken) -> Result<LockReleaseOutcome, CoreError>;

    async fn health_check(&self) -> Result<HealthStatus, CoreError>;
}

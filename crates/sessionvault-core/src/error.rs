use thiserror::Error;

/// Errors that can occur anywhere in the session storage core.
///
/// Variants correspond to the error taxonomy: propagation is the caller's
/// responsibility except for `NotFound` (when semantically optional) and
/// `Corruption` encountered during WAL replay, both of which are recovered
/// locally by the component that observes them.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("contention: {0}")]
    Contention(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("edits blocked: {0}")]
    EditsBlocked(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Structured metadata `{kind, detail}` used when propagating to a
    /// caller; `session_id` is attached by the caller if known.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Contention(_) => "contention",
            CoreError::Corruption(_) => "corruption",
            CoreError::EditsBlocked(_) => "edits_blocked",
            CoreError::SourceUnavailable(_) => "source_unavailable",
            CoreError::BackendUnavailable(_) => "backend_unavailable",
            CoreError::InvariantViolation(_) => "invariant_violation",
            CoreError::Io(_) => "io",
            CoreError::Serialization(_) => "serialization",
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

//! Crate-wide error enums, one per component boundary, following the origin
//! crate's `StoreError`/`CacheError` convention: a flat enum with `#[error(...)]`
//! messages, no `anyhow` in library code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("blocking task join error: {0}")]
    Join(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("http error: {0}")]
    Http(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
    #[error("unroutable artifact: {0}")]
    Unroutable(String),
}

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
}

#[derive(Debug, Error)]
pub enum QaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
    #[error("retriever error: {0}")]
    Retriever(#[from] RetrieverError),
}

/// Error kinds surfaced to HTTP callers, per spec.md §7.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("timeout")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => ApiError::NotFound(m),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(m) => ApiError::NotFound(m),
            ToolError::InvalidInput(m) => ApiError::InvalidInput(m),
            ToolError::DependencyUnavailable(m) => ApiError::DependencyUnavailable(m),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Storage(s) => s.into(),
            OrchestratorError::Tool(t) => t.into(),
            OrchestratorError::Unroutable(m) => ApiError::InvalidInput(m),
        }
    }
}

impl From<RetrieverError> for ApiError {
    fn from(e: RetrieverError) -> Self {
        match e {
            RetrieverError::Storage(s) => s.into(),
            RetrieverError::Tool(t) => t.into(),
        }
    }
}

impl From<QaError> for ApiError {
    fn from(e: QaError) -> Self {
        match e {
            QaError::InvalidInput(m) => ApiError::InvalidInput(m),
            QaError::Storage(s) => s.into(),
            QaError::Tool(t) => t.into(),
            QaError::Retriever(r) => r.into(),
        }
    }
}

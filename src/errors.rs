//! Error types shared across the service.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, CorpusDbError>;

/// Service-wide error enum. The HTTP layer maps each variant to a status
/// code; everything below the HTTP layer returns these directly.
#[derive(Debug, Error)]
pub enum CorpusDbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CorpusDbError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

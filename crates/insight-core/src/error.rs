use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Invalid chunk '{id}': {reason}")]
    InvalidChunk { id: String, reason: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn invalid_chunk(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChunk { id: id.into(), reason: reason.into() }
    }

    /// Backend failures that a caller may retry later. Caller errors and
    /// data errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable(_) | Self::StoreUnavailable(_))
    }

    /// Errors caused by the request itself (4xx-equivalent).
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidQuery(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

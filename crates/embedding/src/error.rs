// Error types for embedding requests

use thiserror::Error;

/// Result type alias for embedding operations
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors returned by an embedding provider
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The service answered with a nonzero code
    #[error("embedding service returned code {code}: {message}")]
    Upstream { code: i64, message: String },

    /// The service answered with a non-success HTTP status
    #[error("embedding service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Every attempt timed out
    #[error("embedding request timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },

    /// Transport failure that is not retried
    #[error("embedding transport error: {0}")]
    Transport(String),

    /// Response body could not be understood
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("invalid embedding configuration: {0}")]
    InvalidConfig(String),
}

// Error types for the write path

use std::time::Duration;

use thiserror::Error;
use vecflow_embedding::EmbeddingError;
use vecflow_pool::WorkerPoolError;
use vecflow_storage::{RecordError, StoreError};

/// Result type alias for write operations
pub type Result<T> = std::result::Result<T, WriteError>;

/// Errors raised while preparing, submitting or executing a write
#[derive(Debug, Error)]
pub enum WriteError {
    /// The embedding service did not produce vectors
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The record violates the collection limits
    #[error("invalid record: {0}")]
    Record(#[from] RecordError),

    /// No in-flight slot became free in time
    #[error("no write slot free within {0:?}")]
    ThrottleTimeout(Duration),

    /// The coordinator has been shut down
    #[error("write coordinator is shut down")]
    Closed,

    /// The worker pool refused the task
    #[error(transparent)]
    Submit(#[from] WorkerPoolError),

    /// A store failure that retrying cannot fix
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every attempt failed with a retryable error
    #[error("write to '{collection}' failed after {attempts} attempts: {last_error}")]
    WriteExhausted {
        collection: String,
        attempts: u32,
        #[source]
        last_error: StoreError,
    },

    /// Configuration error
    #[error("invalid writer configuration: {0}")]
    InvalidConfig(String),
}

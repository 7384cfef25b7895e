// Error types for store access

use std::time::Duration;

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur talking to the storage engine
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection became free within the acquire timeout
    #[error("connection pool exhausted: no connection free within {timeout:?}")]
    PoolExhausted { timeout: Duration },

    /// An unhealthy connection could not be re-established
    #[error("failed to reconnect alias {alias}: {source}")]
    ReconnectFailed {
        alias: String,
        #[source]
        source: Box<StoreError>,
    },

    /// The pool has been closed
    #[error("connection pool is closed")]
    PoolClosed,

    /// Establishing a connection failed
    #[error("failed to connect alias {alias}: {message}")]
    Connect { alias: String, message: String },

    /// Transport-level failure (connection reset, refused, 5xx)
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not finish in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The store understood the request and refused it
    #[error("store rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    /// Request or response could not be (de)serialised
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        StoreError::Transport(msg.into())
    }

    /// Create a rejection error
    pub fn rejected(code: i64, msg: impl Into<String>) -> Self {
        StoreError::Rejected {
            code,
            message: msg.into(),
        }
    }

    /// Whether retrying the same request on a (possibly refreshed)
    /// connection can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Transport(_)
                | StoreError::Timeout(_)
                | StoreError::Connect { .. }
        )
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Serialization(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

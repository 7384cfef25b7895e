//! # Embedding Client
//!
//! Dense and sparse embeddings for chunk text.
//!
//! [`EmbeddingProvider`] is the seam the writer depends on;
//! [`HttpEmbeddingClient`] implements it against the embedding service and
//! retries only requests that time out.

mod error;
mod http;
mod provider;

pub use error::{EmbeddingError, Result};
pub use http::{EmbeddingConfig, HttpEmbeddingClient};
pub use provider::{Embedding, EmbeddingProvider, LexicalWeights};

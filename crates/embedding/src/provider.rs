// Embedding provider abstraction
//
// The writer asks a provider for the dense and sparse vectors of one text.
// The HTTP client implements it; tests substitute scripted providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sparse lexical weights keyed by token id
pub type LexicalWeights = BTreeMap<String, f32>;

/// Vectors for one text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Dense vector
    pub dense: Vec<f32>,
    /// Sparse lexical weights
    pub sparse: LexicalWeights,
}

/// Source of embeddings
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

#[async_trait::async_trait]
impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<P> {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        (**self).embed(text).await
    }
}

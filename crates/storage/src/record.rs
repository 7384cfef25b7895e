//! Stored record model and content addressing
//!
//! A [`Record`] is one chunk of text with its embeddings and identifying
//! metadata. Its id is the SHA-256 of the text, so writing the same text
//! twice upserts the same row.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Sparse lexical weights keyed by term id
pub type SparseVector = BTreeMap<String, f32>;

/// Dense vector dimension of the target collection
pub const DEFAULT_DENSE_DIM: usize = 1024;

/// Maximum `raw_text` length in characters
pub const MAX_RAW_TEXT_CHARS: usize = 2048;

/// Maximum `file_name` length in characters
pub const MAX_FILE_NAME_CHARS: usize = 64;

/// Lowercase hex SHA-256 of the UTF-8 text (64 characters)
pub fn content_id(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Check `text` and `file_name` against the collection's length limits
///
/// Lengths are counted in characters. Empty text is accepted.
pub fn check_text_limits(text: &str, file_name: &str) -> Result<(), RecordError> {
    let text_len = text.chars().count();
    if text_len > MAX_RAW_TEXT_CHARS {
        return Err(RecordError::TextTooLong {
            len: text_len,
            max: MAX_RAW_TEXT_CHARS,
        });
    }

    let name_len = file_name.chars().count();
    if name_len > MAX_FILE_NAME_CHARS {
        return Err(RecordError::FileNameTooLong {
            len: name_len,
            max: MAX_FILE_NAME_CHARS,
        });
    }

    Ok(())
}

/// Record validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Text exceeds the collection's limit
    #[error("raw_text has {len} characters, limit is {max}")]
    TextTooLong { len: usize, max: usize },

    /// File name exceeds the collection's limit
    #[error("file_name has {len} characters, limit is {max}")]
    FileNameTooLong { len: usize, max: usize },

    /// Dense vector has the wrong dimension
    #[error("dense vector has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// One persisted chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    raw_text: String,
    dense_vector: Vec<f32>,
    sparse_vector: SparseVector,
    doc_id: i64,
    file_name: String,
    chunk_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
    create_time: i64,
    update_time: i64,
}

impl Record {
    /// Start building a record for `text`
    pub fn builder(text: impl Into<String>) -> RecordBuilder {
        RecordBuilder::new(text)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn dense_vector(&self) -> &[f32] {
        &self.dense_vector
    }

    pub fn sparse_vector(&self) -> &SparseVector {
        &self.sparse_vector
    }

    /// Partition key
    pub fn doc_id(&self) -> i64 {
        self.doc_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn chunk_id(&self) -> i64 {
        self.chunk_id
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    /// Creation time, epoch milliseconds
    pub fn create_time(&self) -> i64 {
        self.create_time
    }

    /// Last update time, epoch milliseconds
    pub fn update_time(&self) -> i64 {
        self.update_time
    }
}

/// Builder for [`Record`]
///
/// # Example
///
/// ```
/// use vecflow_storage::Record;
///
/// let record = Record::builder("python is interpreted")
///     .doc_id(7)
///     .file_name("python-guide")
///     .chunk_id(2)
///     .dense_vector(vec![0.1; 4])
///     .expected_dim(4)
///     .build()
///     .unwrap();
///
/// assert_eq!(record.id().len(), 64);
/// assert_eq!(record.create_time(), record.update_time());
/// ```
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    text: String,
    dense_vector: Vec<f32>,
    sparse_vector: SparseVector,
    doc_id: i64,
    file_name: String,
    chunk_id: i64,
    metadata: Option<serde_json::Value>,
    timestamp_ms: Option<i64>,
    expected_dim: usize,
}

impl RecordBuilder {
    fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            dense_vector: Vec::new(),
            sparse_vector: SparseVector::new(),
            doc_id: 0,
            file_name: String::new(),
            chunk_id: 0,
            metadata: None,
            timestamp_ms: None,
            expected_dim: DEFAULT_DENSE_DIM,
        }
    }

    pub fn doc_id(mut self, doc_id: i64) -> Self {
        self.doc_id = doc_id;
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn chunk_id(mut self, chunk_id: i64) -> Self {
        self.chunk_id = chunk_id;
        self
    }

    pub fn dense_vector(mut self, dense: Vec<f32>) -> Self {
        self.dense_vector = dense;
        self
    }

    pub fn sparse_vector(mut self, sparse: SparseVector) -> Self {
        self.sparse_vector = sparse;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Use a fixed creation time instead of now
    pub fn timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Dense dimension the collection expects
    pub fn expected_dim(mut self, dim: usize) -> Self {
        self.expected_dim = dim;
        self
    }

    /// Validate against the collection limits and build the record
    pub fn build(self) -> Result<Record, RecordError> {
        check_text_limits(&self.text, &self.file_name)?;

        if self.dense_vector.len() != self.expected_dim {
            return Err(RecordError::DimensionMismatch {
                expected: self.expected_dim,
                actual: self.dense_vector.len(),
            });
        }

        let now = self
            .timestamp_ms
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        Ok(Record {
            id: content_id(&self.text),
            raw_text: self.text,
            dense_vector: self.dense_vector,
            sparse_vector: self.sparse_vector,
            doc_id: self.doc_id,
            file_name: self.file_name,
            chunk_id: self.chunk_id,
            metadata: self.metadata,
            create_time: now,
            update_time: now,
        })
    }
}

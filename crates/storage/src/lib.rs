//! # Vector Store Access
//!
//! Records, connection pooling and connectors for the vecflow write path.
//!
//! ## Features
//!
//! - **Content-addressed records**: [`Record`] ids are the SHA-256 of the
//!   chunk text, so repeated writes upsert the same row
//! - **Connection pool**: [`ConnectionPool`] opens a fixed set of named
//!   connections, probes them on checkout and reconnects dead ones
//! - **Connectors**: [`MilvusConnector`] over REST, [`InMemoryConnector`]
//!   for tests
//!
//! ## Example
//!
//! ```ignore
//! use vecflow_storage::{ConnectionPool, ConnectionPoolConfig, MilvusConfig, MilvusConnector};
//!
//! let connector = MilvusConnector::new(MilvusConfig::new("http://localhost:19530"))?;
//! let pool = ConnectionPool::connect(connector, ConnectionPoolConfig::new(4)).await?;
//!
//! let conn = pool.acquire().await?;
//! conn.upsert("chunks", &records, true).await?;
//! ```

pub mod connection;
pub mod error;
pub mod memory;
pub mod milvus;
pub mod pool;
pub mod record;

pub use connection::{Connector, StoreConnection, UpsertResult};
pub use error::{Result, StoreError};
pub use memory::{InMemoryConnection, InMemoryConnector};
pub use milvus::{MilvusConfig, MilvusConnection, MilvusConnector};
pub use pool::{ConnectionPool, ConnectionPoolConfig, PooledConnection};
pub use record::{
    check_text_limits, content_id, Record, RecordBuilder, RecordError, SparseVector, DEFAULT_DENSE_DIM,
    MAX_FILE_NAME_CHARS, MAX_RAW_TEXT_CHARS,
};

//! # Vector Writer
//!
//! Embeds text chunks and writes them to a vector store under a fixed
//! concurrency budget.
//!
//! ## Features
//!
//! - **Throttled submission**: at most `max_in_flight` writes between
//!   submission and completion
//! - **Retried writes**: retryable store failures trigger connection
//!   validation, reconnect and a fixed backoff
//! - **Injected resources**: the connection pool, worker pool and embedding
//!   provider are constructed by the caller, who also shuts the pools down
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vecflow_pool::{WorkerPool, WorkerPoolConfig};
//! use vecflow_storage::{ConnectionPool, ConnectionPoolConfig, InMemoryConnector};
//! use vecflow_writer::{WriteCoordinator, WriterConfig};
//!
//! let connections = ConnectionPool::connect(InMemoryConnector::new(), ConnectionPoolConfig::new(4)).await?;
//! let workers = Arc::new(WorkerPool::new(WorkerPoolConfig::new(4))?);
//! let writer = WriteCoordinator::new(
//!     WriterConfig::new("chunks"),
//!     connections.clone(),
//!     Arc::clone(&workers),
//!     embedder,
//! )?;
//!
//! let record = writer.gene_data(1, "guide", "how do I install python?", 0).await?;
//! let written = writer.write(vec![record]).await?.await?;
//! writer.shutdown(false).await;
//! workers.shutdown(false).await;
//! connections.close().await;
//! ```

mod config;
mod coordinator;
mod error;

pub use config::{ServiceConfig, WriterConfig};
pub use coordinator::{Chunk, WriteCoordinator, WriteHandle};
pub use error::{Result, WriteError};

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "vecflow_writer=debug,vecflow_pool=info,vecflow_storage=info";

//! Writer and service configuration
//!
//! [`ServiceConfig::from_env`] reads:
//!
//! | variable | default |
//! |---|---|
//! | `EMBEDDINGS_URL` | `http://localhost:8010` |
//! | `MILVUS_URL` | `http://localhost:19530` |
//! | `MILVUS_TOKEN` | unset |
//! | `MILVUS_DB` | `default` |
//! | `MILVUS_COLLECTION` | `chunks` |
//! | `VECFLOW_POOL_SIZE` | 4 |
//! | `VECFLOW_MAX_WORKERS` | 4 |
//! | `VECFLOW_QUEUE_SIZE` | 100 |
//! | `VECFLOW_TASK_TIMEOUT_MS` | unset (no timeout) |
//! | `VECFLOW_SHUTDOWN_TIMEOUT_MS` | 30000 |
//! | `VECFLOW_MAX_IN_FLIGHT` | 8 |
//! | `VECFLOW_MAX_RETRIES` | 10 |
//! | `VECFLOW_THROTTLE_TIMEOUT_MS` | unset (wait forever) |
//! | `VECFLOW_DENSE_DIM` | 1024 |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vecflow_embedding::EmbeddingConfig;
use vecflow_pool::{duration_millis, option_duration_millis, WorkerPoolConfig};
use vecflow_storage::{ConnectionPoolConfig, MilvusConfig, DEFAULT_DENSE_DIM};

/// Write coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Target collection
    pub collection: String,

    /// Maximum write tasks submitted and not yet finished
    pub max_in_flight: usize,

    /// Attempts per write (including the first)
    pub max_retries: u32,

    /// Delay between attempts
    #[serde(with = "duration_millis")]
    pub retry_backoff: Duration,

    /// How long `write` waits for an in-flight slot; `None` waits forever
    #[serde(default, with = "option_duration_millis")]
    pub throttle_timeout: Option<Duration>,

    /// Dense vector dimension of the collection
    pub dense_dim: usize,

    /// Overwrite only the supplied fields of existing rows
    #[serde(default)]
    pub partial_update: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            collection: "chunks".to_string(),
            max_in_flight: 8,
            max_retries: 10,
            retry_backoff: Duration::from_millis(5),
            throttle_timeout: None,
            dense_dim: DEFAULT_DENSE_DIM,
            partial_update: false,
        }
    }
}

impl WriterConfig {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_throttle_timeout(mut self, timeout: Duration) -> Self {
        self.throttle_timeout = Some(timeout);
        self
    }

    pub fn with_dense_dim(mut self, dim: usize) -> Self {
        self.dense_dim = dim;
        self
    }

    pub fn with_partial_update(mut self, partial_update: bool) -> Self {
        self.partial_update = partial_update;
        self
    }
}

/// Everything the service binary needs
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub embedding: EmbeddingConfig,
    pub milvus: MilvusConfig,
    pub connection_pool: ConnectionPoolConfig,
    pub worker_pool: WorkerPoolConfig,
    pub writer: WriterConfig,
}

impl ServiceConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let embedding_url =
            lookup("EMBEDDINGS_URL").unwrap_or_else(|| "http://localhost:8010".to_string());
        let milvus_url =
            lookup("MILVUS_URL").unwrap_or_else(|| "http://localhost:19530".to_string());

        let mut milvus = MilvusConfig::new(milvus_url);
        if let Some(token) = lookup("MILVUS_TOKEN").filter(|t| !t.is_empty()) {
            milvus = milvus.with_token(token);
        }
        if let Some(db) = lookup("MILVUS_DB") {
            milvus = milvus.with_db_name(db);
        }

        let connection_pool = ConnectionPoolConfig::new(parsed(&lookup, "VECFLOW_POOL_SIZE", 4));

        let mut worker_pool = WorkerPoolConfig::new(parsed(&lookup, "VECFLOW_MAX_WORKERS", 4))
            .with_queue_size(parsed(&lookup, "VECFLOW_QUEUE_SIZE", 100))
            .with_shutdown_timeout(Duration::from_millis(parsed(
                &lookup,
                "VECFLOW_SHUTDOWN_TIMEOUT_MS",
                30_000,
            )));
        if let Some(ms) = parsed_opt::<u64, _>(&lookup, "VECFLOW_TASK_TIMEOUT_MS") {
            worker_pool = worker_pool.with_task_timeout(Duration::from_millis(ms));
        }

        let mut writer =
            WriterConfig::new(lookup("MILVUS_COLLECTION").unwrap_or_else(|| "chunks".into()))
                .with_max_in_flight(parsed(&lookup, "VECFLOW_MAX_IN_FLIGHT", 8))
                .with_max_retries(parsed(&lookup, "VECFLOW_MAX_RETRIES", 10))
                .with_dense_dim(parsed(&lookup, "VECFLOW_DENSE_DIM", DEFAULT_DENSE_DIM));
        if let Some(ms) = parsed_opt::<u64, _>(&lookup, "VECFLOW_THROTTLE_TIMEOUT_MS") {
            writer = writer.with_throttle_timeout(Duration::from_millis(ms));
        }

        Self {
            embedding: EmbeddingConfig::new(embedding_url),
            milvus,
            connection_pool,
            worker_pool,
            writer,
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    parsed_opt(lookup, key).unwrap_or(default)
}

fn parsed_opt<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}

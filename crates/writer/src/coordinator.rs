//! Write coordinator
//!
//! Turns chunks into records and writes them through the worker pool.
//!
//! ```text
//! ingest(chunk)
//!     │ gene_data: embed (no retry) ──► Record
//!     ▼
//! write(records)
//!     │ in-flight semaphore (max_in_flight, optional deadline)
//!     ▼
//! WorkerPool::submit ──► write task
//!                          │ acquire connection
//!                          ▼
//!                        upsert ──ok──► done
//!                          │ retryable
//!                          ▼
//!                        validate/reconnect, backoff, next attempt
//! ```
//!
//! The connection and the in-flight slot are owned by the write task and
//! released when it returns, whatever the outcome.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use vecflow_embedding::EmbeddingProvider;
use vecflow_pool::{RetryPolicy, TaskHandle, WorkerPool};
use vecflow_storage::{
    check_text_limits, ConnectionPool, Connector, Record, StoreConnection, StoreError,
    UpsertResult,
};

use crate::config::WriterConfig;
use crate::error::{Result, WriteError};

/// Handle to a submitted write
pub type WriteHandle = TaskHandle<UpsertResult, WriteError>;

/// One chunk of a document, as produced by the splitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: i64,
    pub file_name: String,
    pub chunk_id: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Result of one upsert attempt
enum AttemptOutcome {
    Success(UpsertResult),
    Retryable(StoreError),
    Terminal(StoreError),
}

impl From<std::result::Result<UpsertResult, StoreError>> for AttemptOutcome {
    fn from(result: std::result::Result<UpsertResult, StoreError>) -> Self {
        match result {
            Ok(written) => Self::Success(written),
            Err(err) if err.is_retryable() => Self::Retryable(err),
            Err(err) => Self::Terminal(err),
        }
    }
}

/// Coordinates embedding, throttling and retried writes
///
/// The connection pool, worker pool and embedding provider are supplied
/// by the caller and may be shared with other coordinators.
pub struct WriteCoordinator<C: Connector, P: EmbeddingProvider> {
    config: WriterConfig,
    connections: ConnectionPool<C>,
    workers: Arc<WorkerPool>,
    embedder: P,
    throttle: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl<C: Connector, P: EmbeddingProvider> WriteCoordinator<C, P> {
    pub fn new(
        config: WriterConfig,
        connections: ConnectionPool<C>,
        workers: Arc<WorkerPool>,
        embedder: P,
    ) -> Result<Self> {
        if config.max_in_flight == 0 {
            return Err(WriteError::InvalidConfig(
                "max_in_flight must be > 0".into(),
            ));
        }
        if config.max_retries == 0 {
            return Err(WriteError::InvalidConfig("max_retries must be > 0".into()));
        }

        info!(
            collection = %config.collection,
            max_in_flight = config.max_in_flight,
            max_retries = config.max_retries,
            "Write coordinator ready"
        );

        Ok(Self {
            throttle: Arc::new(Semaphore::new(config.max_in_flight)),
            retry: RetryPolicy::fixed(config.retry_backoff, config.max_retries),
            config,
            connections,
            workers,
            embedder,
        })
    }

    /// Embed `text` and build its record
    ///
    /// Embedding failures are returned as-is; nothing is retried here.
    pub async fn gene_data(
        &self,
        doc_id: i64,
        file_name: &str,
        text: &str,
        chunk_id: i64,
    ) -> Result<Record> {
        self.build_record(doc_id, file_name, text, chunk_id, None)
            .await
    }

    async fn build_record(
        &self,
        doc_id: i64,
        file_name: &str,
        text: &str,
        chunk_id: i64,
        metadata: Option<serde_json::Value>,
    ) -> Result<Record> {
        check_text_limits(text, file_name)?;
        let embedding = self.embedder.embed(text).await?;

        let mut builder = Record::builder(text)
            .doc_id(doc_id)
            .file_name(file_name)
            .chunk_id(chunk_id)
            .dense_vector(embedding.dense)
            .sparse_vector(embedding.sparse)
            .expected_dim(self.config.dense_dim);
        if let Some(metadata) = metadata {
            builder = builder.metadata(metadata);
        }

        Ok(builder.build()?)
    }

    /// Submit `records` as one write task
    ///
    /// Waits for an in-flight slot first, up to `throttle_timeout` when set.
    pub async fn write(&self, records: Vec<Record>) -> Result<WriteHandle> {
        let slot = self.take_slot().await?;

        let task = write_task(
            self.connections.clone(),
            self.config.collection.clone(),
            records,
            self.retry,
            self.config.partial_update,
            slot,
        );

        // On rejection the task is dropped along with its slot
        let handle = self.workers.submit(task)?;
        debug!(task_id = %handle.id(), in_flight = self.in_flight(), "Write submitted");
        Ok(handle)
    }

    /// Submit each record list as its own write task, in order
    ///
    /// Stops at the first submission error; tasks already submitted keep
    /// running.
    pub async fn write_batch(&self, batches: Vec<Vec<Record>>) -> Result<Vec<WriteHandle>> {
        let mut handles = Vec::with_capacity(batches.len());
        for records in batches {
            handles.push(self.write(records).await?);
        }
        Ok(handles)
    }

    /// Embed a chunk and submit its record
    pub async fn ingest(&self, chunk: Chunk) -> Result<WriteHandle> {
        let record = self
            .build_record(
                chunk.doc_id,
                &chunk.file_name,
                &chunk.text,
                chunk.chunk_id,
                chunk.metadata,
            )
            .await?;
        self.write(vec![record]).await
    }

    /// Write tasks submitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.config
            .max_in_flight
            .saturating_sub(self.throttle.available_permits())
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionPool<C> {
        &self.connections
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Stop accepting writes and wait for this coordinator's writes to finish
    ///
    /// Returns the number of writes still in flight. With `force` it returns
    /// at once; otherwise it waits up to the worker pool's
    /// `shutdown_timeout`. The worker pool and connection pool stay open,
    /// since other coordinators may share them; their owner shuts them down.
    #[instrument(skip(self), fields(collection = %self.config.collection))]
    pub async fn shutdown(&self, force: bool) -> usize {
        if self.throttle.is_closed() {
            return self.in_flight();
        }

        // Holding every slot means no write of ours is still running.
        // Writers queued behind us fail with `Closed` once the throttle closes.
        let drained = if force {
            None
        } else {
            let limit = self.workers.config().shutdown_timeout;
            let all = u32::try_from(self.config.max_in_flight).unwrap_or(u32::MAX);
            match tokio::time::timeout(limit, self.throttle.acquire_many(all)).await {
                Ok(Ok(permits)) => Some(permits),
                Ok(Err(_)) => None,
                Err(_) => {
                    warn!(
                        timeout_ms = limit.as_millis() as u64,
                        in_flight = self.in_flight(),
                        "Timed out waiting for writes"
                    );
                    None
                }
            }
        };

        self.throttle.close();
        let remaining = if drained.is_some() { 0 } else { self.in_flight() };
        drop(drained);

        info!(force, remaining, "Write coordinator stopped");
        remaining
    }

    async fn take_slot(&self) -> Result<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.throttle).acquire_owned();
        let permit = match self.config.throttle_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire)
                .await
                .map_err(|_| WriteError::ThrottleTimeout(limit))?,
            None => acquire.await,
        };
        permit.map_err(|_| WriteError::Closed)
    }
}

async fn write_task<C: Connector>(
    connections: ConnectionPool<C>,
    collection: String,
    records: Vec<Record>,
    retry: RetryPolicy,
    partial_update: bool,
    _slot: OwnedSemaphorePermit,
) -> Result<UpsertResult> {
    let mut conn = connections.acquire().await.map_err(|err| {
        error!(collection = %collection, error = %err, "No connection for write");
        err
    })?;

    let mut attempt = 1;
    loop {
        let outcome: AttemptOutcome = conn
            .upsert(&collection, &records, partial_update)
            .await
            .into();

        match outcome {
            AttemptOutcome::Success(written) => {
                debug!(
                    alias = conn.alias(),
                    attempt,
                    upsert_count = written.upsert_count,
                    "Write succeeded"
                );
                return Ok(written);
            }
            AttemptOutcome::Terminal(err) => {
                error!(alias = conn.alias(), attempt, error = %err, "Write rejected");
                return Err(err.into());
            }
            AttemptOutcome::Retryable(err) => {
                if !retry.has_attempts_remaining(attempt) {
                    error!(alias = conn.alias(), attempts = attempt, error = %err, "Write retries exhausted");
                    return Err(WriteError::WriteExhausted {
                        collection,
                        attempts: attempt,
                        last_error: err,
                    });
                }

                warn!(alias = conn.alias(), attempt, error = %err, "Write failed, validating connection");
                conn.validate().await?;

                attempt += 1;
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vecflow_embedding::{Embedding, EmbeddingError};
    use vecflow_pool::{TaskError, WorkerPoolConfig};
    use vecflow_storage::{ConnectionPoolConfig, InMemoryConnector};

    const DIM: usize = 4;

    #[derive(Default)]
    struct FixedEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> vecflow_embedding::Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.starts_with("reject") {
                return Err(EmbeddingError::Upstream {
                    code: 1,
                    message: "bad request".into(),
                });
            }
            Ok(Embedding {
                dense: vec![0.5; DIM],
                sparse: [("7".to_string(), 0.1)].into_iter().collect(),
            })
        }
    }

    async fn coordinator(
        config: WriterConfig,
    ) -> (
        InMemoryConnector,
        WriteCoordinator<InMemoryConnector, Arc<FixedEmbedder>>,
        Arc<FixedEmbedder>,
    ) {
        let store = InMemoryConnector::new();
        let connections = ConnectionPool::connect(store.clone(), ConnectionPoolConfig::new(2))
            .await
            .unwrap();
        let workers = Arc::new(WorkerPool::new(WorkerPoolConfig::new(2)).unwrap());
        let embedder = Arc::new(FixedEmbedder::default());
        let coordinator = WriteCoordinator::new(
            config.with_dense_dim(DIM),
            connections,
            workers,
            Arc::clone(&embedder),
        )
        .unwrap();
        (store, coordinator, embedder)
    }

    #[tokio::test]
    async fn test_rejects_zero_in_flight() {
        let connections =
            ConnectionPool::connect(InMemoryConnector::new(), ConnectionPoolConfig::new(1))
                .await
                .unwrap();
        let workers = Arc::new(WorkerPool::new(WorkerPoolConfig::new(1)).unwrap());
        let result = WriteCoordinator::new(
            WriterConfig::default().with_max_in_flight(0),
            connections,
            workers,
            FixedEmbedder::default(),
        );
        assert!(matches!(result, Err(WriteError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_gene_data_builds_record() {
        let (_, coordinator, _) = coordinator(WriterConfig::new("chunks")).await;

        let record = coordinator
            .gene_data(11, "install-guide", "pip install vecflow", 2)
            .await
            .unwrap();

        assert_eq!(record.id(), vecflow_storage::content_id("pip install vecflow"));
        assert_eq!(record.doc_id(), 11);
        assert_eq!(record.file_name(), "install-guide");
        assert_eq!(record.chunk_id(), 2);
        assert_eq!(record.dense_vector().len(), DIM);
        assert_eq!(record.sparse_vector().len(), 1);
    }

    #[tokio::test]
    async fn test_gene_data_checks_dimension() {
        let (_, coordinator, _) = coordinator(WriterConfig::new("chunks")).await;
        let coordinator = WriteCoordinator {
            config: coordinator.config.clone().with_dense_dim(DIM + 1),
            ..coordinator
        };

        let err = coordinator.gene_data(1, "f", "text", 0).await.unwrap_err();
        assert!(matches!(err, WriteError::Record(_)));
    }

    #[tokio::test]
    async fn test_gene_data_accepts_empty_text() {
        let (_, coordinator, embedder) = coordinator(WriterConfig::new("chunks")).await;

        let record = coordinator.gene_data(1, "f", "", 0).await.unwrap();

        assert_eq!(record.id(), vecflow_storage::content_id(""));
        assert_eq!(record.raw_text(), "");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_text_rejected_before_embedding() {
        let (_, coordinator, embedder) = coordinator(WriterConfig::new("chunks")).await;
        let text = "x".repeat(vecflow_storage::MAX_RAW_TEXT_CHARS + 1);

        let err = coordinator.gene_data(1, "f", &text, 0).await.unwrap_err();

        assert!(matches!(
            err,
            WriteError::Record(vecflow_storage::RecordError::TextTooLong { .. })
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ingest_writes_record() {
        let (store, coordinator, _) = coordinator(WriterConfig::new("chunks")).await;

        let handle = coordinator
            .ingest(Chunk {
                doc_id: 5,
                file_name: "handbook".into(),
                chunk_id: 0,
                text: "chapter one".into(),
                metadata: Some(serde_json::json!({"Header1": "Intro"})),
            })
            .await
            .unwrap();

        let written = handle.await.unwrap();
        assert_eq!(written.upsert_count, 1);

        let stored = store
            .get("chunks", &vecflow_storage::content_id("chapter one"))
            .unwrap();
        assert_eq!(stored.metadata().unwrap()["Header1"], "Intro");
        assert_eq!(coordinator.in_flight(), 0);
        assert_eq!(coordinator.connections().idle_count(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let (store, coordinator, embedder) = coordinator(WriterConfig::new("chunks")).await;

        let err = coordinator
            .gene_data(1, "f", "reject me", 0)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WriteError::Embedding(EmbeddingError::Upstream { code: 1, .. })
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.upsert_calls(), 0);
        assert_eq!(coordinator.workers().stats().submitted, 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (store, coordinator, _) =
            coordinator(WriterConfig::new("chunks").with_max_retries(3)).await;
        let record = coordinator.gene_data(1, "f", "always broken", 0).await.unwrap();
        store.fail_record(record.id(), u32::MAX);

        let err = coordinator
            .write(vec![record])
            .await
            .unwrap()
            .await
            .unwrap_err()
            .into_failure()
            .unwrap();

        match err {
            WriteError::WriteExhausted {
                attempts,
                collection,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(collection, "chunks");
                assert!(last_error.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.upsert_calls(), 3);
        assert_eq!(coordinator.connections().reconnect_count(), 2);
        assert_eq!(coordinator.in_flight(), 0);
        assert_eq!(coordinator.connections().idle_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_ends_write() {
        let (store, coordinator, _) = coordinator(WriterConfig::new("chunks")).await;
        let record = coordinator.gene_data(1, "f", "flaky", 0).await.unwrap();
        store.fail_record(record.id(), 1);
        store.fail_next_connects(1);

        let err = coordinator
            .write(vec![record])
            .await
            .unwrap()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskError::Failed(WriteError::Store(StoreError::ReconnectFailed { .. }))
        ));
        assert_eq!(store.upsert_calls(), 1);
        assert_eq!(coordinator.connections().idle_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_timeout() {
        let (_, coordinator, _) = coordinator(
            WriterConfig::new("chunks")
                .with_max_in_flight(1)
                .with_throttle_timeout(Duration::from_millis(100)),
        )
        .await;

        let held = Arc::clone(&coordinator.throttle).acquire_owned().await.unwrap();
        let err = coordinator.write(Vec::new()).await.unwrap_err();
        assert!(matches!(err, WriteError::ThrottleTimeout(_)));

        drop(held);
        let handle = coordinator.write(Vec::new()).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_shutdown() {
        let (_, coordinator, _) = coordinator(WriterConfig::new("chunks")).await;

        assert_eq!(coordinator.shutdown(false).await, 0);
        assert_eq!(coordinator.shutdown(false).await, 0);

        assert!(matches!(
            coordinator.write(Vec::new()).await.unwrap_err(),
            WriteError::Closed
        ));
        assert!(!coordinator.connections().is_closed());
        assert!(!coordinator.workers().is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_on_stuck_write() {
        let (_, coordinator, _) = coordinator(WriterConfig::new("chunks")).await;
        let coordinator = WriteCoordinator {
            workers: Arc::new(
                WorkerPool::new(
                    WorkerPoolConfig::new(2).with_shutdown_timeout(Duration::from_secs(1)),
                )
                .unwrap(),
            ),
            ..coordinator
        };

        // A write that never finishes keeps its slot
        let _stuck = Arc::clone(&coordinator.throttle).acquire_owned().await.unwrap();

        let started = tokio::time::Instant::now();
        assert_eq!(coordinator.shutdown(false).await, 1);
        assert!(started.elapsed() >= Duration::from_secs(1));

        assert!(matches!(
            coordinator.write(Vec::new()).await.unwrap_err(),
            WriteError::Closed
        ));
    }

    #[tokio::test]
    async fn test_force_shutdown_returns_at_once() {
        let (_, coordinator, _) = coordinator(WriterConfig::new("chunks")).await;
        let _stuck = Arc::clone(&coordinator.throttle).acquire_owned().await.unwrap();

        assert_eq!(coordinator.shutdown(true).await, 1);
    }
}

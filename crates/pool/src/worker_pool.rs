//! Worker pool for task execution
//!
//! Runs submitted futures on a bounded number of workers with
//! capacity-based admission, per-task timeouts, metrics and timed shutdown.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::counter::AtomicCounter;
use crate::{duration_millis, option_duration_millis};

/// How often a graceful shutdown re-checks for outstanding tasks
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Name used in logs
    pub name: String,

    /// Maximum tasks executing at once
    pub max_workers: usize,

    /// Maximum tasks admitted (executing + waiting for a worker)
    pub queue_size: usize,

    /// How long a submitter waits for a task before reporting a timeout
    #[serde(default, with = "option_duration_millis")]
    pub task_timeout: Option<Duration>,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "writer-pool".to_string(),
            max_workers: 4,
            queue_size: 100,
            task_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with `max_workers` workers
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the admission capacity
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the per-task timeout (zero disables it)
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Set the graceful shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WorkerPoolError> {
        if self.max_workers == 0 {
            return Err(WorkerPoolError::InvalidConfig(
                "max_workers must be > 0".into(),
            ));
        }
        if self.queue_size == 0 {
            return Err(WorkerPoolError::InvalidConfig(
                "queue_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Submission attempts accepted past the shutdown check (rejections included)
    pub submitted: u64,
    /// Tasks whose outcome has been reported, whatever it was
    pub completed: u64,
    /// Tasks reported as failed, timed out, cancelled or panicked
    pub failed: u64,
    /// Tasks whose submitter stopped waiting after `task_timeout`
    pub timeout: u64,
    /// Submissions refused because the pool was at capacity
    pub rejected: u64,
}

impl PoolStats {
    /// Admitted tasks whose outcome has not been reported yet
    pub fn outstanding(&self) -> u64 {
        self.submitted
            .saturating_sub(self.rejected)
            .saturating_sub(self.completed)
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted={} completed={} failed={} timeout={} rejected={}",
            self.submitted, self.completed, self.failed, self.timeout, self.rejected
        )
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Invalid configuration
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),

    /// Shutdown has been initiated
    #[error("worker pool '{0}' is shutting down, cannot submit new tasks")]
    ShuttingDown(String),

    /// Admission capacity exhausted
    #[error("task rejected: worker pool queue full (max={queue_size}), {stats}")]
    QueueFull { queue_size: usize, stats: PoolStats },
}

/// Outcome of an admitted task that did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    /// The task itself returned an error
    #[error("{0}")]
    Failed(E),

    /// The submitter stopped waiting; the task may still be running
    #[error("task {task_id} exceeded {limit:?} timeout")]
    Timeout { task_id: Uuid, limit: Duration },

    /// The task never finished: the pool was force-stopped before it got a
    /// worker, or the runtime shut down under it
    #[error("task {task_id} was cancelled")]
    Cancelled { task_id: Uuid },

    /// The task panicked
    #[error("task {task_id} panicked: {message}")]
    Panicked { task_id: Uuid, message: String },
}

impl<E> TaskError<E> {
    /// The task's own error, if that is what happened
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the submitter gave up waiting
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Future resolving to the result of a submitted task
///
/// Dropping the handle detaches from the task without cancelling it.
#[derive(Debug)]
pub struct TaskHandle<T, E> {
    task_id: Uuid,
    inner: JoinHandle<Result<T, TaskError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    /// Identifier used for this task in logs
    pub fn id(&self) -> Uuid {
        self.task_id
    }

    /// Whether the outcome is ready
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task_id = self.task_id;
        Pin::new(&mut self.inner).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(join_failure(task_id, err)),
        })
    }
}

struct Shared {
    config: WorkerPoolConfig,
    capacity: AtomicCounter,
    workers: Arc<Semaphore>,
    stats: Mutex<PoolStats>,
    shutdown: AtomicBool,
}

impl Shared {
    fn report<T, E: fmt::Display>(
        &self,
        task_id: Uuid,
        started: Instant,
        result: Result<T, TaskError<E>>,
    ) -> Result<T, TaskError<E>> {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        {
            let mut stats = self.stats.lock();
            if result.is_err() {
                stats.failed += 1;
            }
            stats.completed += 1;
        }

        match &result {
            Ok(_) => debug!(pool = %self.config.name, %task_id, elapsed_ms, "Task completed"),
            Err(err) => error!(
                pool = %self.config.name,
                %task_id,
                elapsed_ms,
                error = %err,
                "Task failed"
            ),
        }
        result
    }
}

/// Admission slot held by a task until its work finishes
struct AdmissionSlot(Arc<Shared>);

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.0.capacity.increment();
    }
}

/// Bounded worker pool
///
/// Must be used from within a Tokio runtime.
///
/// # Example
///
/// ```ignore
/// use vecflow_pool::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(4).with_queue_size(100))?;
///
/// let handle = pool.submit(async { Ok::<_, std::io::Error>(42) })?;
/// assert_eq!(handle.await?, 42);
///
/// let final_stats = pool.shutdown(false).await;
/// ```
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        config.validate()?;

        info!(
            pool = %config.name,
            workers = config.max_workers,
            queue_size = config.queue_size,
            task_timeout_ms = config.task_timeout.map(|t| t.as_millis() as u64),
            "Worker pool initialised"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                capacity: AtomicCounter::new(config.queue_size as i64),
                workers: Arc::new(Semaphore::new(config.max_workers)),
                stats: Mutex::new(PoolStats::default()),
                shutdown: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Submit a task for execution
    ///
    /// Fails immediately when the pool is shutting down or already holds
    /// `queue_size` admitted tasks.
    pub fn submit<F, T, E>(&self, task: F) -> Result<TaskHandle<T, E>, WorkerPoolError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let shared = &self.shared;
        if shared.shutdown.load(Ordering::Acquire) {
            return Err(WorkerPoolError::ShuttingDown(shared.config.name.clone()));
        }

        shared.stats.lock().submitted += 1;

        if shared.capacity.decrement() < 0 {
            shared.capacity.increment();
            let stats = {
                let mut stats = shared.stats.lock();
                stats.rejected += 1;
                *stats
            };
            debug!(pool = %shared.config.name, %stats, "Task rejected, queue full");
            return Err(WorkerPoolError::QueueFull {
                queue_size: shared.config.queue_size,
                stats,
            });
        }

        let task_id = Uuid::now_v7();
        let slot = AdmissionSlot(Arc::clone(shared));
        let workers = Arc::clone(&shared.workers);

        let work = tokio::spawn(async move {
            let _slot = slot;
            let _permit = workers.acquire_owned().await.ok()?;
            Some(task.await)
        });

        let inner = tokio::spawn(supervise(Arc::clone(shared), task_id, work));
        Ok(TaskHandle { task_id, inner })
    }

    /// Consistent snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        *self.shared.stats.lock()
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Pool configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }

    /// Admission slots currently free
    pub fn available_capacity(&self) -> i64 {
        self.shared.capacity.value()
    }

    /// Tasks currently holding a worker
    pub fn active_workers(&self) -> usize {
        self.shared
            .config
            .max_workers
            .saturating_sub(self.shared.workers.available_permits())
    }

    /// Whether shutdown has been initiated
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting tasks and return the final counters
    ///
    /// `force` drops tasks still waiting for a worker and returns at once.
    /// Otherwise waits up to `shutdown_timeout` for outstanding tasks and
    /// returns regardless, logging how many were left. Calling it again
    /// just returns the current counters.
    #[instrument(skip(self), fields(pool = %self.shared.config.name))]
    pub async fn shutdown(&self, force: bool) -> PoolStats {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return self.stats();
        }

        info!(force, stats = %self.stats(), "Initiating worker pool shutdown");

        if force {
            self.shared.workers.close();
        } else {
            let timeout = self.shared.config.shutdown_timeout;
            let deadline = Instant::now() + timeout;

            loop {
                let outstanding = self.stats().outstanding();
                if outstanding == 0 {
                    debug!("All tasks completed");
                    break;
                }

                if Instant::now() >= deadline {
                    warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        remaining_tasks = outstanding,
                        "Shutdown timeout reached"
                    );
                    break;
                }

                tokio::time::sleep(DRAIN_POLL_INTERVAL.min(timeout)).await;
            }
        }

        let final_stats = self.stats();
        info!(stats = %final_stats, "Worker pool shutdown complete");
        final_stats
    }
}

async fn supervise<T, E: fmt::Display>(
    shared: Arc<Shared>,
    task_id: Uuid,
    work: JoinHandle<Option<Result<T, E>>>,
) -> Result<T, TaskError<E>> {
    let started = Instant::now();

    let joined = match shared.config.task_timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(joined) => joined,
            Err(_) => {
                // The work keeps running detached and frees its slot when done
                shared.stats.lock().timeout += 1;
                return shared.report(task_id, started, Err(TaskError::Timeout { task_id, limit }));
            }
        },
        None => work.await,
    };

    let result = match joined {
        Ok(Some(Ok(value))) => Ok(value),
        Ok(Some(Err(err))) => Err(TaskError::Failed(err)),
        Ok(None) => Err(TaskError::Cancelled { task_id }),
        Err(err) => Err(join_failure(task_id, err)),
    };

    shared.report(task_id, started, result)
}

fn join_failure<E>(task_id: Uuid, err: JoinError) -> TaskError<E> {
    if err.is_cancelled() {
        TaskError::Cancelled { task_id }
    } else {
        TaskError::Panicked {
            task_id,
            message: err.to_string(),
        }
    }
}

//! # Bounded Execution Pool
//!
//! Concurrency building blocks for the vecflow write pipeline.
//!
//! ## Features
//!
//! - **Admission counter**: [`AtomicCounter`] returns post-update values so
//!   check-and-revert admission is race free
//! - **Worker pool**: [`WorkerPool`] caps running and admitted tasks, reports
//!   timeouts without cancelling work, and shuts down within a time budget
//! - **Retry policy**: [`RetryPolicy`], bounded attempts a fixed delay apart
//! - **Scoped instrumentation**: [`task_scope`] times a block of work
//!
//! ## Architecture
//!
//! ```text
//! submit(task)
//!     │  shutdown flag? ──► ShuttingDown
//!     ▼
//! ┌──────────────────────────────┐
//! │ capacity counter (queue_size)│── negative ──► undo, QueueFull
//! └──────────────────────────────┘
//!     │
//!     ▼
//! ┌──────────────────────────────┐     ┌─────────────────────────┐
//! │ worker semaphore (max_workers)│ ──► │ task future             │
//! └──────────────────────────────┘     └─────────────────────────┘
//!     │                                        │
//!     ▼                                        ▼
//! supervisor: wait (≤ task_timeout) ──► stats ──► TaskHandle
//! ```

mod counter;
mod retry;
mod scope;
mod worker_pool;

pub use counter::AtomicCounter;
pub use retry::RetryPolicy;
pub use scope::task_scope;
pub use worker_pool::{
    PoolStats, TaskError, TaskHandle, WorkerPool, WorkerPoolConfig, WorkerPoolError,
};

/// Serde support for Duration as milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
pub mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

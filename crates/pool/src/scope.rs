//! Scoped task instrumentation

use std::future::Future;

use anyhow::Context;
use tokio::time::Instant;
use tracing::{debug, error};

/// Run `work`, logging how long it took and tagging any error with `task_name`
///
/// Independent of pool admission; use it to time a block of work without
/// repeating the bookkeeping.
///
/// # Example
///
/// ```ignore
/// use vecflow_pool::task_scope;
///
/// let chunks = task_scope("load_chunks", async { read_chunks(&path).await }).await?;
/// ```
pub async fn task_scope<T, F>(task_name: &str, work: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    debug!(task = task_name, "Task started");

    match work.await {
        Ok(value) => {
            debug!(
                task = task_name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task completed"
            );
            Ok(value)
        }
        Err(err) => {
            error!(
                task = task_name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "Task failed"
            );
            Err(err).with_context(|| format!("task '{task_name}' failed"))
        }
    }
}

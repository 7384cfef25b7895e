use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vecflow_embedding::HttpEmbeddingClient;
use vecflow_pool::{task_scope, WorkerPool};
use vecflow_storage::{ConnectionPool, MilvusConnector};
use vecflow_writer::{Chunk, ServiceConfig, WriteCoordinator, WriteHandle, DEFAULT_LOG_FILTER};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        tracing::info!("Loaded .env from {:?}", path);
    }

    let config = ServiceConfig::from_env();
    tracing::info!(
        milvus = %config.milvus.uri,
        embeddings = %config.embedding.base_url,
        collection = %config.writer.collection,
        pool_size = config.connection_pool.pool_size,
        max_workers = config.worker_pool.max_workers,
        "vecflow-writer starting"
    );

    let connector = MilvusConnector::new(config.milvus.clone())?;
    let connections = ConnectionPool::connect(connector, config.connection_pool.clone())
        .await
        .context("Failed to open Milvus connections")?;
    let workers = Arc::new(WorkerPool::new(config.worker_pool.clone())?);
    let embedder = HttpEmbeddingClient::new(config.embedding.clone())?;
    let writer = WriteCoordinator::new(
        config.writer.clone(),
        connections.clone(),
        Arc::clone(&workers),
        embedder,
    )?;

    let outcome = tokio::select! {
        outcome = task_scope("ingest_stdin", ingest_stdin(&writer)) => Some(outcome),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            None
        }
    };

    let force = outcome.is_none();
    let unfinished = writer.shutdown(force).await;
    let stats = workers.shutdown(force).await;
    connections.close().await;

    match outcome {
        Some(Ok(summary)) => {
            tracing::info!(
                chunks = summary.chunks,
                written = summary.written,
                failed = summary.failed,
                %stats,
                "Ingestion finished"
            );
            if summary.failed > 0 {
                anyhow::bail!("{} of {} chunks failed", summary.failed, summary.chunks);
            }
            Ok(())
        }
        Some(Err(e)) => Err(e),
        None => anyhow::bail!("interrupted with {unfinished} writes in flight, {stats}"),
    }
}

#[derive(Debug, Default)]
struct Summary {
    chunks: usize,
    written: u64,
    failed: usize,
}

/// Ingest JSON-lines chunks from stdin and wait for every write
async fn ingest_stdin<C, P>(writer: &WriteCoordinator<C, P>) -> Result<Summary>
where
    C: vecflow_storage::Connector,
    P: vecflow_embedding::EmbeddingProvider,
{
    let mut summary = Summary::default();
    let mut handles: Vec<(usize, WriteHandle)> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let chunk: Chunk = serde_json::from_str(&line)
            .with_context(|| format!("Invalid chunk on line {line_no}"))?;
        summary.chunks += 1;

        match writer.ingest(chunk).await {
            Ok(handle) => handles.push((line_no, handle)),
            Err(e) => {
                tracing::error!(line = line_no, error = %e, "Chunk not submitted");
                summary.failed += 1;
            }
        }
    }

    for (line, handle) in handles {
        match handle.await {
            Ok(written) => summary.written += written.upsert_count,
            Err(e) => {
                tracing::error!(line, error = %e, "Chunk write failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

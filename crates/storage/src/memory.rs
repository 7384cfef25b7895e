//! In-memory store for tests and local runs
//!
//! Provides the same upsert semantics as a real collection plus fault
//! injection: connections can be severed, connects can be made to fail,
//! and individual records can be made to fail their upserts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::connection::{Connector, StoreConnection, UpsertResult};
use crate::error::{Result, StoreError};
use crate::record::Record;

#[derive(Default)]
struct StoreState {
    collections: DashMap<String, DashMap<String, Record>>,
    // Health flag of the newest connection per alias
    links: DashMap<String, Arc<AtomicBool>>,
    record_faults: DashMap<String, u32>,
    failing_connects: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    upsert_calls: AtomicU64,
}

/// In-memory [`Connector`]
///
/// Clones share state, so a test can keep one handle for inspection and
/// give another to a pool.
///
/// # Example
///
/// ```
/// use vecflow_storage::InMemoryConnector;
///
/// let store = InMemoryConnector::new();
/// let inspector = store.clone();
/// store.fail_next_connects(1);
///
/// assert_eq!(inspector.connect_count(), 0);
/// assert_eq!(inspector.row_count("chunks"), 0);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    state: Arc<StoreState>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored record
    pub fn get(&self, collection: &str, id: &str) -> Option<Record> {
        self.state
            .collections
            .get(collection)
            .and_then(|rows| rows.get(id).map(|r| r.clone()))
    }

    /// Number of rows in a collection
    pub fn row_count(&self, collection: &str) -> usize {
        self.state
            .collections
            .get(collection)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    /// Connections opened so far, including reconnects
    pub fn connect_count(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Connections closed so far, including ones replaced by a reconnect
    pub fn disconnect_count(&self) -> u64 {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Upsert calls received so far, including failed ones
    pub fn upsert_calls(&self) -> u64 {
        self.state.upsert_calls.load(Ordering::SeqCst)
    }

    /// Break the current connection registered under `alias`
    pub fn sever(&self, alias: &str) {
        if let Some(link) = self.state.links.get(alias) {
            link.store(false, Ordering::SeqCst);
        }
    }

    /// Make the next `n` connect calls fail
    pub fn fail_next_connects(&self, n: u64) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `times` upserts containing record `id` fail with a
    /// transport error that also severs the connection used
    pub fn fail_record(&self, id: impl Into<String>, times: u32) {
        self.state.record_faults.insert(id.into(), times);
    }

    fn take_connect_fault(&self) -> bool {
        self.state
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_record_fault(&self, records: &[Record]) -> Option<String> {
        for record in records {
            if let Some(mut remaining) = self.state.record_faults.get_mut(record.id()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Some(record.id().to_string());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Connection = InMemoryConnection;

    async fn connect(&self, alias: &str) -> Result<InMemoryConnection> {
        if self.take_connect_fault() {
            return Err(StoreError::Connect {
                alias: alias.to_string(),
                message: "connection refused".into(),
            });
        }

        let link = Arc::new(AtomicBool::new(true));
        self.state.links.insert(alias.to_string(), Arc::clone(&link));
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        Ok(InMemoryConnection {
            store: self.clone(),
            link,
        })
    }
}

/// Connection to an [`InMemoryConnector`]
pub struct InMemoryConnection {
    store: InMemoryConnector,
    link: Arc<AtomicBool>,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.link.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::transport("connection reset by peer"))
        }
    }
}

#[async_trait]
impl StoreConnection for InMemoryConnection {
    async fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn upsert(
        &self,
        collection: &str,
        records: &[Record],
        _partial_update: bool,
    ) -> Result<UpsertResult> {
        self.store.state.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;

        if let Some(id) = self.store.take_record_fault(records) {
            self.link.store(false, Ordering::SeqCst);
            return Err(StoreError::transport(format!(
                "connection reset while writing {id}"
            )));
        }

        let rows = self
            .store
            .state
            .collections
            .entry(collection.to_string())
            .or_default();
        let mut upsert_ids = Vec::with_capacity(records.len());
        for record in records {
            rows.insert(record.id().to_string(), record.clone());
            upsert_ids.push(record.id().to_string());
        }

        Ok(UpsertResult {
            upsert_count: records.len() as u64,
            upsert_ids,
        })
    }

    async fn disconnect(&self) {
        self.link.store(false, Ordering::SeqCst);
        self.store.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// Store connection traits
//
// A Connector opens named connections; the pool owns them and hands out
// exclusive access. Backends implement both traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::Record;

/// Result of an upsert call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResult {
    /// Number of rows written
    pub upsert_count: u64,
    /// Primary keys written, in request order
    #[serde(default)]
    pub upsert_ids: Vec<String>,
}

/// Opens connections to a store
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: StoreConnection;

    /// Open a connection registered under `alias`
    async fn connect(&self, alias: &str) -> Result<Self::Connection>;
}

/// A live connection to a store
#[async_trait]
pub trait StoreConnection: Send + Sync + 'static {
    /// Cheap liveness check
    async fn ping(&self) -> Result<()>;

    /// Insert or update `records` in `collection`
    ///
    /// With `partial_update`, only the supplied fields of existing rows are
    /// overwritten.
    async fn upsert(
        &self,
        collection: &str,
        records: &[Record],
        partial_update: bool,
    ) -> Result<UpsertResult>;

    /// Release server-side resources. Errors are not reported.
    async fn disconnect(&self) {}
}

//! Milvus connector over the REST v2 API
//!
//! Every call is an HTTP POST returning `{"code": 0, "data": ...}`. A
//! nonzero `code` is a rejection, 5xx and transport failures are
//! retryable, other non-success statuses are rejections.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connection::{Connector, StoreConnection, UpsertResult};
use crate::error::{Result, StoreError};
use crate::record::Record;

/// Milvus endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilvusConfig {
    /// Base URI, e.g. `http://localhost:19530`
    pub uri: String,

    /// Bearer token (`user:password` or an API key)
    pub token: Option<String>,

    /// Database name
    pub db_name: String,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl MilvusConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            token: None,
            db_name: "default".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v2/vectordb/{}", self.uri.trim_end_matches('/'), path)
    }
}

/// Opens [`MilvusConnection`]s
#[derive(Debug, Clone)]
pub struct MilvusConnector {
    config: MilvusConfig,
}

impl MilvusConnector {
    pub fn new(config: MilvusConfig) -> Result<Self> {
        if !(config.uri.starts_with("http://") || config.uri.starts_with("https://")) {
            return Err(StoreError::InvalidConfig(format!(
                "milvus uri must be an http(s) URL, got '{}'",
                config.uri
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &MilvusConfig {
        &self.config
    }

    fn build_client(&self, alias: &str) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| StoreError::InvalidConfig(format!("invalid milvus token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        Client::builder()
            .timeout(self.config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Connect {
                alias: alias.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl Connector for MilvusConnector {
    type Connection = MilvusConnection;

    async fn connect(&self, alias: &str) -> Result<MilvusConnection> {
        let conn = MilvusConnection {
            alias: alias.to_string(),
            client: self.build_client(alias)?,
            config: self.config.clone(),
        };

        conn.ping().await.map_err(|e| StoreError::Connect {
            alias: alias.to_string(),
            message: e.to_string(),
        })?;

        debug!(alias = %alias, uri = %self.config.uri, "Connected to Milvus");
        Ok(conn)
    }
}

/// One HTTP client bound to a Milvus endpoint
pub struct MilvusConnection {
    alias: String,
    client: Client,
    config: MilvusConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListCollectionsRequest<'a> {
    db_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpsertRequest<'a> {
    db_name: &'a str,
    collection_name: &'a str,
    data: &'a [Record],
    partial_update: bool,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl std::fmt::Debug for MilvusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MilvusConnection")
            .field("alias", &self.alias)
            .field("uri", &self.config.uri)
            .field("db_name", &self.config.db_name)
            .finish()
    }
}

impl MilvusConnection {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<Option<T>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let url = self.config.endpoint(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            warn!(alias = %self.alias, status = %status, body = %body, "Milvus request failed");
            return Err(if status.is_server_error() {
                StoreError::transport(format!("HTTP {status}: {body}"))
            } else {
                StoreError::rejected(i64::from(status.as_u16()), body)
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| self.send_error(e))?;
        if envelope.code != 0 {
            return Err(StoreError::rejected(
                envelope.code,
                envelope.message.unwrap_or_default(),
            ));
        }
        Ok(envelope.data)
    }

    fn send_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.config.request_timeout)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl StoreConnection for MilvusConnection {
    async fn ping(&self) -> Result<()> {
        let request = ListCollectionsRequest {
            db_name: &self.config.db_name,
        };
        self.post::<_, serde_json::Value>("collections/list", &request)
            .await
            .map(|_| ())
    }

    async fn upsert(
        &self,
        collection: &str,
        records: &[Record],
        partial_update: bool,
    ) -> Result<UpsertResult> {
        let request = UpsertRequest {
            db_name: &self.config.db_name,
            collection_name: collection,
            data: records,
            partial_update,
        };

        let result = self
            .post::<_, UpsertResult>("entities/upsert", &request)
            .await?
            .unwrap_or_default();

        debug!(
            alias = %self.alias,
            collection = %collection,
            upsert_count = result.upsert_count,
            "Upserted records"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(text: &str) -> Record {
        Record::builder(text)
            .doc_id(3)
            .file_name("guide")
            .chunk_id(0)
            .dense_vector(vec![0.25; 2])
            .expected_dim(2)
            .build()
            .unwrap()
    }

    async fn mount_list(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": ["chunks"]
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_rejects_non_http_uri() {
        let err = MilvusConnector::new(MilvusConfig::new("localhost:19530")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_connect_probes_server() {
        let server = MockServer::start().await;
        mount_list(&server).await;

        let connector = MilvusConnector::new(MilvusConfig::new(server.uri())).unwrap();
        let conn = connector.connect("conn_0").await.unwrap();

        assert_eq!(conn.alias(), "conn_0");
        assert!(conn.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_fails_when_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("starting"))
            .mount(&server)
            .await;

        let connector = MilvusConnector::new(MilvusConfig::new(server.uri())).unwrap();
        let err = connector.connect("conn_1").await.unwrap_err();
        assert!(matches!(err, StoreError::Connect { ref alias, .. } if alias == "conn_1"));
    }

    #[tokio::test]
    async fn test_upsert_sends_records() {
        let server = MockServer::start().await;
        mount_list(&server).await;

        let r = record("milvus stores vectors");
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/upsert"))
            .and(header("authorization", "Bearer root:Milvus"))
            .and(body_partial_json(json!({
                "dbName": "default",
                "collectionName": "chunks",
                "partialUpdate": true,
                "data": [{"id": r.id(), "doc_id": 3, "raw_text": "milvus stores vectors"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"upsertCount": 1, "upsertIds": [r.id()]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = MilvusConfig::new(server.uri()).with_token("root:Milvus");
        let conn = MilvusConnector::new(config)
            .unwrap()
            .connect("conn_0")
            .await
            .unwrap();

        let result = conn.upsert("chunks", &[r.clone()], true).await.unwrap();
        assert_eq!(result.upsert_count, 1);
        assert_eq!(result.upsert_ids, vec![r.id().to_string()]);
    }

    #[tokio::test]
    async fn test_upsert_without_data_counts_nothing() {
        let server = MockServer::start().await;
        mount_list(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/upsert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .mount(&server)
            .await;

        let conn = MilvusConnector::new(MilvusConfig::new(server.uri()).with_token("secret"))
            .unwrap()
            .connect("conn_2")
            .await
            .unwrap();

        let result = conn.upsert("chunks", &[record("x")], false).await.unwrap();
        assert_eq!(result.upsert_count, 0);
        assert!(result.upsert_ids.is_empty());

        let debug = format!("{conn:?}");
        assert!(debug.contains("conn_2"));
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    async fn test_nonzero_code_is_rejection() {
        let server = MockServer::start().await;
        mount_list(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/upsert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 100,
                "message": "collection not found[collection=missing]"
            })))
            .mount(&server)
            .await;

        let conn = MilvusConnector::new(MilvusConfig::new(server.uri()))
            .unwrap()
            .connect("conn_0")
            .await
            .unwrap();

        let err = conn
            .upsert("missing", &[record("x")], true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { code: 100, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        mount_list(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/upsert"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let conn = MilvusConnector::new(MilvusConfig::new(server.uri()))
            .unwrap()
            .connect("conn_0")
            .await
            .unwrap();

        let err = conn.upsert("chunks", &[record("x")], true).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_rejection() {
        let server = MockServer::start().await;
        mount_list(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/upsert"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad body"))
            .mount(&server)
            .await;

        let conn = MilvusConnector::new(MilvusConfig::new(server.uri()))
            .unwrap()
            .connect("conn_0")
            .await
            .unwrap();

        let err = conn.upsert("chunks", &[record("x")], true).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { code: 400, .. }));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        mount_list(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/upsert"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"code": 0}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let config =
            MilvusConfig::new(server.uri()).with_request_timeout(Duration::from_millis(100));
        let conn = MilvusConnector::new(config)
            .unwrap()
            .connect("conn_0")
            .await
            .unwrap();

        let err = conn.upsert("chunks", &[record("x")], true).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
        assert!(err.is_retryable());
    }
}

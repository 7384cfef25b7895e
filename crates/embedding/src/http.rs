//! HTTP embedding client
//!
//! Talks to an embedding service exposing `POST {base}/api/embeddings`
//! with `{"query": text}` and answering
//! `{"code": 0, "data": {"dense_vec": [...], "lexical_weights": {...}}}`.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;
use vecflow_pool::{duration_millis, RetryPolicy};

use crate::error::{EmbeddingError, Result};
use crate::provider::{Embedding, EmbeddingProvider, LexicalWeights};

const EMBEDDINGS_PATH: &str = "api/embeddings";

/// Embedding client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Service base URL, e.g. `http://localhost:8010`
    pub base_url: String,

    /// Per-request timeout
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Attempts when requests time out (including the first)
    pub max_attempts: u32,

    /// Fixed delay between timed-out attempts
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
}

impl EmbeddingConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    dense_vec: Vec<f32>,
    #[serde(default)]
    lexical_weights: LexicalWeights,
}

/// [`EmbeddingProvider`] backed by the HTTP embedding service
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    client: Client,
    endpoint: Url,
    retry: RetryPolicy,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            EmbeddingError::InvalidConfig(format!("bad base_url '{}': {e}", config.base_url))
        })?;
        let endpoint = base
            .join(EMBEDDINGS_PATH)
            .map_err(|e| EmbeddingError::InvalidConfig(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        headers.insert("from", HeaderValue::from_static("Y"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            retry: RetryPolicy::fixed(config.retry_delay, config.max_attempts),
        })
    }

    /// Resolved embeddings endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send_once(&self, text: &str) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(self.endpoint.clone())
            .json(&EmbeddingRequest { query: text })
            .send()
            .await
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut attempt = 1;
        let response = loop {
            match self.send_once(text).await {
                Ok(response) => break response,
                Err(e) if e.is_timeout() => {
                    if !self.retry.has_attempts_remaining(attempt) {
                        error!(attempts = attempt, "Embedding request timed out");
                        return Err(EmbeddingError::TimedOut { attempts: attempt });
                    }
                    attempt += 1;
                    warn!(attempt, error = %e, "Embedding request timed out, retrying");
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(EmbeddingError::Transport(e.to_string())),
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            error!(status = %status, body = %body, "Embedding request failed");
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if payload.code != 0 {
            let message = payload.msg.unwrap_or_default();
            error!(code = payload.code, message = %message, "Embedding service error");
            return Err(EmbeddingError::Upstream {
                code: payload.code,
                message,
            });
        }

        let data = payload
            .data
            .ok_or_else(|| EmbeddingError::InvalidResponse("missing data".into()))?;

        debug!(
            dense_dim = data.dense_vec.len(),
            sparse_terms = data.lexical_weights.len(),
            "Embedding received"
        );

        Ok(Embedding {
            dense: data.dense_vec,
            sparse: data.lexical_weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpEmbeddingClient {
        HttpEmbeddingClient::new(EmbeddingConfig::new(server.uri())).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = EmbeddingConfig::new("http://localhost:8010");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(5));
    }

    #[test]
    fn test_config_serializes_millis() {
        let config = EmbeddingConfig::new("http://localhost:8010");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 5000);
        assert_eq!(json["retry_delay"], 5);
    }

    #[test]
    fn test_endpoint_join() {
        let client =
            HttpEmbeddingClient::new(EmbeddingConfig::new("http://10.0.0.5:8010")).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "http://10.0.0.5:8010/api/embeddings"
        );

        let client =
            HttpEmbeddingClient::new(EmbeddingConfig::new("http://host/svc/")).unwrap();
        assert_eq!(client.endpoint().as_str(), "http://host/svc/api/embeddings");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpEmbeddingClient::new(EmbeddingConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(header("from", "Y"))
            .and(body_json(json!({"query": "python怎样安装？"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {
                    "dense_vec": [0.1, 0.2, 0.3],
                    "lexical_weights": {"6": 0.12, "2041": 0.3}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedding = client(&server).embed("python怎样安装？").await.unwrap();
        assert_eq!(embedding.dense, vec![0.1, 0.2, 0.3]);
        assert_eq!(embedding.sparse.len(), 2);
        assert_eq!(embedding.sparse["2041"], 0.3);
    }

    #[tokio::test]
    async fn test_upstream_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 1, "msg": "bad request"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).embed("text").await.unwrap_err();
        match err {
            EmbeddingError::Upstream { code, message } => {
                assert_eq!(code, 1);
                assert_eq!(message, "bad request");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_http_status_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_timeouts_retried_then_give_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"code": 0, "data": {"dense_vec": []}}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let config = EmbeddingConfig::new(server.uri()).with_timeout(Duration::from_millis(50));
        let client = HttpEmbeddingClient::new(config).unwrap();

        let err = client.embed("slow").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::TimedOut { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_missing_data_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .mount(&server)
            .await;

        let err = client(&server).embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_not_retried() {
        // Nothing listens on port 1
        let uri = "http://127.0.0.1:1";

        let err = HttpEmbeddingClient::new(EmbeddingConfig::new(uri))
            .unwrap()
            .embed("text")
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Transport(_)));
    }
}

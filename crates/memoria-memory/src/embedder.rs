// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding generation.
//!
//! [`HttpEmbedder`] talks to an OpenAI-compatible `/v1/embeddings` service.
//! [`EmbeddingClient`] wraps any [`EmbeddingAdapter`] and never fails: on
//! error, timeout or a wrong-sized vector it returns a deterministic
//! feature-hashed placeholder flagged as degraded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use memoria_config::model::EmbeddingConfig;
use memoria_core::traits::{EmbeddingAdapter, PluginAdapter};
use memoria_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};
use memoria_core::{MemoriaError, RetryPolicy, retry_transient};

use crate::text::tokenize;

/// An embedding vector plus whether it is a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    /// True when the service failed and `vector` is a local placeholder.
    /// Degraded vectors must not be persisted.
    pub degraded: bool,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Client for an OpenAI-compatible embedding endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, MemoriaError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    MemoriaError::Config(format!("invalid embedding API key header value: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemoriaError::Embedding {
                message: format!("failed to build HTTP client: {e}"),
                transient: false,
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
            retry: RetryPolicy::with_retries(config.max_retries),
        })
    }

    /// Overrides the retry policy (tests use short delays).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoriaError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| MemoriaError::Embedding {
                message: format!("HTTP request failed: {e}"),
                transient: e.is_timeout() || e.is_connect() || e.is_request(),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        debug!(status = %status, "embedding response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoriaError::Embedding {
                message: format!("embedding service returned {status}: {body}"),
                transient: is_transient_status(status),
                source: None,
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| MemoriaError::Embedding {
                message: format!("failed to parse embedding response: {e}"),
                transient: false,
                source: Some(Box::new(e)),
            })?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

#[async_trait]
impl PluginAdapter for HttpEmbedder {
    fn name(&self) -> &str {
        "http-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        match self.request_once(&["health check".to_string()]).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl EmbeddingAdapter for HttpEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemoriaError> {
        let embeddings = retry_transient(self.retry, "embedding", || {
            self.request_once(&input.texts)
        })
        .await?;

        if embeddings.len() != input.texts.len() {
            return Err(MemoriaError::embedding(format!(
                "expected {} embeddings, got {}",
                input.texts.len(),
                embeddings.len()
            )));
        }

        Ok(EmbeddingOutput {
            embeddings,
            dimensions: self.dimensions,
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Never-failing embedding front end used by the extractor and search engine.
#[derive(Clone)]
pub struct EmbeddingClient {
    adapter: Arc<dyn EmbeddingAdapter>,
    timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(adapter: Arc<dyn EmbeddingAdapter>, timeout: Duration) -> Self {
        Self { adapter, timeout }
    }

    pub fn dimensions(&self) -> usize {
        self.adapter.dimensions()
    }

    /// Embed one text. Falls back to a degraded placeholder on any failure.
    pub async fn embed(&self, text: &str) -> Embedding {
        match self.try_embed(text).await {
            Ok(vector) => Embedding {
                vector,
                degraded: false,
            },
            Err(e) => {
                warn!(error = %e, "embedding unavailable, using placeholder");
                crate::telemetry::record_degraded("embedding");
                Embedding {
                    vector: placeholder_embedding(text, self.dimensions()),
                    degraded: true,
                }
            }
        }
    }

    /// Embed one text, surfacing the failure instead of degrading.
    pub async fn try_embed(&self, text: &str) -> Result<Vec<f32>, MemoriaError> {
        let input = EmbeddingInput {
            texts: vec![text.to_string()],
        };
        let output = tokio::time::timeout(self.timeout, self.adapter.embed(input))
            .await
            .map_err(|_| MemoriaError::Timeout {
                duration: self.timeout,
            })??;

        let vector = output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemoriaError::embedding("embedding returned no results"))?;

        let expected = self.dimensions();
        if vector.len() != expected {
            return Err(MemoriaError::embedding(format!(
                "expected {expected} dimensions, got {}",
                vector.len()
            )));
        }
        Ok(vector)
    }
}

/// Deterministic bag-of-words placeholder: each token is hashed into a
/// signed bucket, then the vector is L2-normalized.
///
/// Empty input (or zero dimensions) yields an all-zero vector.
pub fn placeholder_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    if dimensions == 0 {
        return vector;
    }
    for token in tokenize(text) {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let index = (bucket % dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::cosine_similarity;
    use memoria_test_utils::{FailingEmbedder, MockEmbedder};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: base_url.to_string(),
            api_key: Some("embed-key".to_string()),
            model: "test-model".to_string(),
            dimensions: 3,
            timeout_secs: 5,
            max_retries: 2,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn placeholder_is_deterministic_and_normalized() {
        let a = placeholder_embedding("I live in Seattle", 64);
        let b = placeholder_embedding("I live in Seattle", 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn placeholder_of_empty_text_is_zero() {
        assert!(placeholder_embedding("", 8).iter().all(|v| *v == 0.0));
        assert!(placeholder_embedding("text", 0).is_empty());
    }

    #[test]
    fn placeholder_shares_signal_for_shared_words() {
        let a = placeholder_embedding("seattle coffee rain", 256);
        let b = placeholder_embedding("seattle coffee", 256);
        let c = placeholder_embedding("quantum chromodynamics", 256);
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn client_degrades_on_adapter_failure() {
        let client = EmbeddingClient::new(Arc::new(FailingEmbedder::new(16)), Duration::from_secs(1));
        let embedding = client.embed("hello world").await;
        assert!(embedding.degraded);
        assert_eq!(embedding.vector.len(), 16);
        assert!(logs_contain("embedding unavailable, using placeholder"));
    }

    #[tokio::test]
    async fn client_passes_through_healthy_adapter() {
        let client = EmbeddingClient::new(Arc::new(MockEmbedder::new(32)), Duration::from_secs(1));
        let embedding = client.embed("hello world").await;
        assert!(!embedding.degraded);
        assert_eq!(embedding.vector.len(), 32);
    }

    #[tokio::test]
    async fn http_embedder_parses_openai_shape() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}],
            "model": "test-model"
        });
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer embed-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri())).unwrap();
        let output = embedder
            .embed(EmbeddingInput {
                texts: vec!["hello".into()],
            })
            .await
            .unwrap();
        assert_eq!(output.embeddings, vec![vec![0.1, 0.2, 0.3]]);
        assert_eq!(output.dimensions, 3);
    }

    #[tokio::test]
    async fn http_embedder_retries_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri()))
            .unwrap()
            .with_retry_policy(fast_retry());
        let output = embedder
            .embed(EmbeddingInput {
                texts: vec!["hello".into()],
            })
            .await
            .unwrap();
        assert_eq!(output.embeddings[0], vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn http_embedder_does_not_retry_400() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri()))
            .unwrap()
            .with_retry_policy(fast_retry());
        let err = embedder
            .embed(EmbeddingInput {
                texts: vec!["hello".into()],
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"), "got: {err}");
    }

    #[tokio::test]
    async fn client_rejects_wrong_dimensions_as_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&server.uri())).unwrap();
        let client = EmbeddingClient::new(Arc::new(embedder), Duration::from_secs(5));
        let embedding = client.embed("hello").await;
        assert!(embedding.degraded);
        assert_eq!(embedding.vector.len(), 3);
    }
}

//! HTTP embedding providers.
//!
//! - **[`OpenAIProvider`]**: `POST {url}/v1/embeddings` (default
//!   `https://api.openai.com`), key from `OPENAI_API_KEY`.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` (default
//!   `http://localhost:11434`).
//!
//! Providers make exactly one request per call. Retrying is the job
//! runner's business, so each failure is classified instead:
//!
//! - request timeout → `Timeout`
//! - connect failure or other transport error → `Connection`
//! - HTTP 429 / 5xx → `Connection` (provider temporarily unavailable)
//! - other HTTP 4xx, malformed body → `Provider` (permanent)
//!
//! Use [`create_provider`] to build the configured provider:
//!
//! ```rust
//! # use notebook_rag::config::EmbeddingConfig;
//! # use notebook_rag::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! assert!(create_provider(&config).unwrap().is_none());
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use notebook_rag_core::embedding::EmbeddingProvider;
use notebook_rag_core::PipelineError;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the provider named by `config.provider`, or `None` when disabled.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIProvider::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaProvider::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

/// Classify a transport-level failure.
pub fn map_reqwest(provider: &str, err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout(format!("{} request timed out: {}", provider, err))
    } else if err.is_decode() {
        PipelineError::Provider(format!("{} returned an unreadable body: {}", provider, err))
    } else {
        PipelineError::Connection(format!("{} connection error: {}", provider, err))
    }
}

/// Classify a non-success HTTP status.
pub fn map_status(provider: &str, status: StatusCode, body: &str) -> PipelineError {
    let msg = format!("{} API error {}: {}", provider, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PipelineError::Connection(msg)
    } else {
        PipelineError::Provider(msg)
    }
}

async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &Value,
) -> notebook_rag_core::Result<Value> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| map_reqwest(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(map_status(provider, status, &text));
    }
    response.json().await.map_err(|e| map_reqwest(provider, e))
}

fn float_array(value: &Value, what: &str) -> notebook_rag_core::Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| PipelineError::Provider(format!("Invalid {} response: embedding is not an array", what)))
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

fn check_count(what: &str, got: usize, expected: usize) -> notebook_rag_core::Result<()> {
    if got != expected {
        return Err(PipelineError::Provider(format!(
            "{} returned {} embeddings for {} inputs",
            what, got, expected
        )));
    }
    Ok(())
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (or a compatible endpoint).
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> notebook_rag_core::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json("OpenAI", request, &body).await?;
        let vectors = parse_openai_response(&json)?;
        check_count("OpenAI", vectors.len(), texts.len())?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
pub fn parse_openai_response(json: &Value) -> notebook_rag_core::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| PipelineError::Provider("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| {
            PipelineError::Provider("Invalid OpenAI response: missing embedding".into())
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(pos, |i| i as usize);
        indexed.push((index, float_array(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "Ollama")?;
        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> notebook_rag_core::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')));
        let json = post_json("Ollama", request, &body).await?;
        let vectors = parse_ollama_response(&json)?;
        check_count("Ollama", vectors.len(), texts.len())?;
        Ok(vectors)
    }
}

pub fn parse_ollama_response(json: &Value) -> notebook_rag_core::Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            PipelineError::Provider("Invalid Ollama response: missing embeddings array".into())
        })?
        .iter()
        .map(|e| float_array(e, "Ollama"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_response_is_reordered_by_index() {
        let body = json!({
            "data": [
                { "index": 1, "embedding": [0.5, 0.5] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn malformed_responses_are_permanent() {
        let err = parse_openai_response(&json!({ "error": "nope" })).unwrap_err();
        assert!(!err.is_transient());
        let err = parse_ollama_response(&json!({ "embeddings": [1, 2] })).unwrap_err();
        assert!(matches!(err, PipelineError::Provider(_)));
    }

    #[test]
    fn status_classification() {
        assert!(map_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(map_status("OpenAI", StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!map_status("OpenAI", StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!map_status("Ollama", StatusCode::NOT_FOUND, "model missing").is_transient());
    }

    #[test]
    fn disabled_provider_is_none() {
        assert!(create_provider(&EmbeddingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn ollama_provider_takes_url_override() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            url: Some("http://gpu-box:11434".into()),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config).unwrap().unwrap();
        assert_eq!(provider.model_name(), "nomic-embed-text");
        assert_eq!(provider.dims(), 768);
    }
}

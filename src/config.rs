//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/nbrag.sqlite"
//!
//! [chunking]
//! chunk_size = 500
//!
//! [embedding]
//! provider = "openai"          # disabled | openai | ollama
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [jobs]
//! workers = 4
//!
//! [jobs.embed_chunk]
//! max_attempts = 15
//! wait_min_secs = 1
//! wait_max_secs = 120
//!
//! [context]
//! max_tokens = 8000
//!
//! [server]
//! bind = "127.0.0.1:5055"
//! ```
//!
//! Every section except `[db]` is optional.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notebook_rag_core::context::PriorityWeights;
use notebook_rag_core::jobs::RetryPolicy;
use notebook_rag_core::{ErrorKind, PipelineSettings};

pub const DEFAULT_CONFIG_PATH: &str = "./config/nbrag.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    notebook_rag_core::chunk::DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub embed_chunk: EmbedChunkRetryConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            embed_chunk: EmbedChunkRetryConfig::default(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbedChunkRetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_wait_min_secs")]
    pub wait_min_secs: u64,
    #[serde(default = "default_wait_max_secs")]
    pub wait_max_secs: u64,
}

impl Default for EmbedChunkRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_min_secs: default_wait_min_secs(),
            wait_max_secs: default_wait_max_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    15
}
fn default_wait_min_secs() -> u64 {
    1
}
fn default_wait_max_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContextSettings {
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub priority_weights: PriorityWeights,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5055".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Settings handed to every pipeline command.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let retry = &self.jobs.embed_chunk;
        PipelineSettings {
            chunk_size: self.chunking.chunk_size,
            embed_chunk_retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                wait_min: Duration::from_secs(retry.wait_min_secs),
                wait_max: Duration::from_secs(retry.wait_max_secs),
                retry_on: ErrorKind::TRANSIENT.to_vec(),
                log_level: tracing::Level::DEBUG,
            },
            priority_weights: self.context.priority_weights,
            default_max_tokens: self.context.max_tokens,
            ..PipelineSettings::default()
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.jobs.workers == 0 {
        anyhow::bail!("jobs.workers must be > 0");
    }

    let retry = &config.jobs.embed_chunk;
    if retry.max_attempts == 0 {
        anyhow::bail!("jobs.embed_chunk.max_attempts must be >= 1");
    }
    if retry.wait_min_secs > retry.wait_max_secs {
        anyhow::bail!("jobs.embed_chunk.wait_min_secs must not exceed wait_max_secs");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config("[db]\npath = \"./x.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.jobs.workers, 4);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.server.bind, "127.0.0.1:5055");

        let settings = config.pipeline_settings();
        assert_eq!(settings.embed_chunk_retry.max_attempts, 15);
        assert_eq!(settings.embed_chunk_retry.wait_max, Duration::from_secs(120));
        assert_eq!(settings.priority_weights.source, 100);
    }

    #[test]
    fn enabled_provider_needs_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let err = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"cohere\"\nmodel = \"m\"\ndims = 8\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn retry_bounds_are_checked() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[jobs.embed_chunk]\nwait_min_secs = 10\nwait_max_secs = 5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("wait_min_secs"));
    }

    #[test]
    fn priority_weights_are_partial() {
        let config =
            parse_config("[db]\npath = \"x\"\n[context.priority_weights]\nnote = 90\n").unwrap();
        assert_eq!(config.context.priority_weights.note, 90);
        assert_eq!(config.context.priority_weights.insight, 75);
    }
}

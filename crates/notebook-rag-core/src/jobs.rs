//! Background-job contracts: job records, retry policies, the queue trait
//! and the command trait.
//!
//! The core never executes jobs itself. It submits commands through a
//! [`JobQueue`] and each command's body runs later on whatever worker pool
//! the application provides. Retry behaviour is declared per command with a
//! [`RetryPolicy`]; the executor decides whether a failed attempt runs again
//! by asking [`RetryPolicy::should_retry`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::EmbeddingProvider;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::settings::PipelineSettings;
use crate::store::Store;

/// Application name every pipeline command is registered under.
pub const APP_NAME: &str = "notebook_rag";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::Storage(format!("unknown job status: {}", other))),
        }
    }
}

/// One dispatched unit of work as tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub app: String,
    pub command: String,
    pub payload: Value,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created: i64,
    pub updated: i64,
}

/// Declarative retry behaviour for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub wait_min: Duration,
    pub wait_max: Duration,
    /// Error kinds that trigger another attempt. Anything else fails the job.
    pub retry_on: Vec<ErrorKind>,
    /// Level for "retrying" log lines.
    pub log_level: tracing::Level,
}

impl RetryPolicy {
    /// Chunk embedding: 15 attempts, 1–120 s exponential jitter, transient
    /// kinds only, logged at debug.
    pub fn embed_chunk_default() -> Self {
        Self {
            max_attempts: 15,
            wait_min: Duration::from_secs(1),
            wait_max: Duration::from_secs(120),
            retry_on: ErrorKind::TRANSIENT.to_vec(),
            log_level: tracing::Level::DEBUG,
        }
    }

    /// Whether a failure on `attempt` (1-based) should be tried again.
    pub fn should_retry(&self, err: &PipelineError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.retry_on.contains(&err.kind())
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// `wait_min * 2^(attempt-1)` plus a random jitter of up to the same
    /// amount, clamped to `[wait_min, wait_max]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let min_ms = self.wait_min.as_millis() as f64;
        let max_ms = self.wait_max.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base = min_ms * 2f64.powi(exponent);
        let jittered = base + base * unit_jitter();
        let ms = jittered.min(max_ms).max(min_ms);
        Duration::from_millis(ms as u64)
    }
}

/// Pseudo-random value in `[0.0, 1.0)` from a process-wide LCG.
fn unit_jitter() -> f64 {
    static SEED: AtomicU64 = AtomicU64::new(0);

    if SEED.load(Ordering::Relaxed) == 0 {
        let init = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(12345, |d| d.as_nanos() as u64)
            | 1;
        SEED.compare_exchange(0, init, Ordering::Relaxed, Ordering::Relaxed)
            .ok();
    }

    const A: u64 = 6_364_136_223_846_793_005;
    const C: u64 = 1_442_695_040_888_963_407;
    let prev = SEED
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
            Some(x.wrapping_mul(A).wrapping_add(C))
        })
        .unwrap_or(42);
    (prev >> 11) as f64 / (1u64 << 53) as f64
}

/// Job substrate consumed by the pipeline.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue `command` for `app` and return the new job id.
    async fn submit(&self, app: &str, command: &str, payload: Value) -> Result<String>;

    /// Current record of a job, or `None` if the id is unknown.
    async fn get_status(&self, job_id: &str) -> Result<Option<JobRecord>>;
}

/// A named unit of background work.
///
/// `execute` returning `Err` means the attempt raised: the executor retries
/// it if the command's policy covers the error kind and records a failed job
/// otherwise. Returning `Ok` with `"success": false` in the output is a
/// handled failure and is never retried.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means the command runs exactly once.
    fn retry_policy(&self) -> Option<&RetryPolicy> {
        None
    }

    async fn execute(&self, ctx: &CommandContext, payload: Value) -> Result<Value>;
}

/// Everything a command body can touch.
#[derive(Clone)]
pub struct CommandContext {
    pub store: Arc<dyn Store>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub queue: Arc<dyn JobQueue>,
    pub settings: PipelineSettings,
}

impl CommandContext {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        queue: Arc<dyn JobQueue>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            queue,
            settings,
        }
    }

    /// The configured embedding provider, or [`PipelineError::NoEmbeddingModel`].
    pub fn embedder(&self) -> Result<&dyn EmbeddingProvider> {
        self.embedder
            .as_deref()
            .ok_or(PipelineError::NoEmbeddingModel)
    }
}

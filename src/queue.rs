//! In-process job queue: a persisted ledger plus a tokio worker pool.
//!
//! [`LocalJobQueue::start`] spawns `workers` tasks that pull job ids from
//! a channel and run the registered [`Command`] for each. A command with a
//! [`RetryPolicy`](notebook_rag_core::jobs::RetryPolicy) is re-run after a
//! backoff whenever it raises an error the policy covers; everything else
//! finishes on its first attempt.
//!
//! Final status per job:
//!
//! - `execute` returned `Ok` without `"success": false` → `completed`
//! - `execute` returned `Ok` with `"success": false` → `failed`, error taken
//!   from the output's `error_message`
//! - `execute` returned `Err` (retries exhausted or not covered) → `failed`
//!
//! Jobs an earlier process left behind are picked up by
//! [`LocalJobQueue::resume_unfinished`]: `queued` jobs and `running` jobs of
//! retryable commands are re-enqueued, while a `running` job of a command
//! without a retry policy is marked `failed`, since it may already have
//! submitted follow-up work.
//!
//! A queue started with zero workers only records submissions; the jobs stay
//! `queued` until a process with workers resumes them.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::Level;

use notebook_rag_core::embedding::EmbeddingProvider;
use notebook_rag_core::jobs::{Command, CommandContext, JobQueue, JobRecord, JobStatus, APP_NAME};
use notebook_rag_core::store::Store;
use notebook_rag_core::{PipelineError, PipelineSettings, Result};

use crate::ledger::JobLedger;

/// Error recorded on a non-retryable job found `running` at resume time.
pub const INTERRUPTED: &str = "interrupted by restart";

pub struct LocalJobQueue {
    ledger: JobLedger,
    commands: HashMap<&'static str, Arc<dyn Command>>,
    sender: OnceLock<mpsc::UnboundedSender<String>>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl LocalJobQueue {
    /// Create the queue, build the shared [`CommandContext`], and spawn the
    /// worker pool. Must be called inside a tokio runtime.
    ///
    /// Unfinished jobs from earlier runs are left alone; call
    /// [`resume_unfinished`](Self::resume_unfinished) to pick them up.
    pub async fn start(
        ledger: JobLedger,
        commands: Vec<Arc<dyn Command>>,
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        settings: PipelineSettings,
        workers: usize,
    ) -> Result<(Arc<Self>, CommandContext)> {
        let queue = Arc::new(Self {
            ledger,
            commands: commands.into_iter().map(|c| (c.name(), c)).collect(),
            sender: OnceLock::new(),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let ctx = CommandContext::new(store, embedder, queue.clone(), settings);

        if workers == 0 {
            tracing::debug!("job queue started without workers; submissions stay queued");
            return Ok((queue, ctx));
        }

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers {
            let queue = queue.clone();
            let ctx = ctx.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(job_id) = next else { break };
                    queue.run_job(&ctx, &job_id).await;
                    queue.job_done();
                }
                tracing::debug!(worker, "job worker stopped");
            });
        }
        if queue.sender.set(tx).is_err() {
            return Err(PipelineError::Dispatch("job queue already started".into()));
        }

        Ok((queue, ctx))
    }

    /// Pick up jobs an earlier process left `queued` or `running`. Returns
    /// the number re-enqueued. Does nothing on a queue without workers.
    pub async fn resume_unfinished(&self) -> Result<usize> {
        if self.sender.get().is_none() {
            return Ok(0);
        }
        let mut resumed = 0;
        for job in self.ledger.unfinished().await? {
            let retryable = self
                .commands
                .get(job.command.as_str())
                .is_some_and(|c| c.retry_policy().is_some());
            if job.status == JobStatus::Running && !retryable {
                tracing::warn!(
                    job_id = %job.id,
                    command = %job.command,
                    attempts = job.attempts,
                    "job was interrupted mid-run, marking failed"
                );
                self.ledger
                    .finish(&job.id, JobStatus::Failed, None, Some(INTERRUPTED))
                    .await?;
                continue;
            }
            self.enqueue(job.id)?;
            resumed += 1;
        }
        if resumed > 0 {
            tracing::info!(count = resumed, "re-enqueued unfinished jobs");
        }
        Ok(resumed)
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// Resolve once no submitted job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn enqueue(&self, job_id: String) -> Result<()> {
        let Some(sender) = self.sender.get() else {
            tracing::debug!(job_id, "no workers, job left queued");
            return Ok(());
        };
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if sender.send(job_id).is_err() {
            self.job_done();
            return Err(PipelineError::Dispatch("job workers have stopped".into()));
        }
        Ok(())
    }

    fn job_done(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn run_job(&self, ctx: &CommandContext, job_id: &str) {
        if let Err(e) = self.try_run_job(ctx, job_id).await {
            tracing::error!(job_id, error = %e, "job bookkeeping failed");
        }
    }

    async fn try_run_job(&self, ctx: &CommandContext, job_id: &str) -> Result<()> {
        let Some(job) = self.ledger.get(job_id).await? else {
            tracing::warn!(job_id, "job vanished from ledger");
            return Ok(());
        };
        let Some(command) = self.commands.get(job.command.as_str()).cloned() else {
            let msg = format!("unknown command: {}", job.command);
            return self
                .ledger
                .finish(job_id, JobStatus::Failed, None, Some(&msg))
                .await;
        };

        let mut attempt = job.attempts;
        loop {
            attempt += 1;
            self.ledger.start_attempt(job_id, attempt).await?;

            match command.execute(ctx, job.payload.clone()).await {
                Ok(output) => {
                    let handled_failure = output.get("success") == Some(&Value::Bool(false));
                    if handled_failure {
                        let msg = output
                            .get("error_message")
                            .and_then(Value::as_str)
                            .unwrap_or("command reported failure")
                            .to_string();
                        tracing::warn!(job_id, command = command.name(), error = %msg, "job failed");
                        return self
                            .ledger
                            .finish(job_id, JobStatus::Failed, Some(&output), Some(&msg))
                            .await;
                    }
                    tracing::debug!(job_id, command = command.name(), attempt, "job completed");
                    return self
                        .ledger
                        .finish(job_id, JobStatus::Completed, Some(&output), None)
                        .await;
                }
                Err(err) => match command.retry_policy() {
                    Some(policy) if policy.should_retry(&err, attempt) => {
                        let delay = policy.delay_for_attempt(attempt);
                        log_retry(policy.log_level, job_id, command.name(), attempt, &err, delay);
                        tokio::time::sleep(delay).await;
                    }
                    _ => {
                        tracing::error!(
                            job_id,
                            command = command.name(),
                            attempt,
                            error = %err,
                            "job failed"
                        );
                        let msg = err.to_string();
                        return self
                            .ledger
                            .finish(job_id, JobStatus::Failed, None, Some(&msg))
                            .await;
                    }
                },
            }
        }
    }
}

fn log_retry(
    level: Level,
    job_id: &str,
    command: &str,
    attempt: u32,
    err: &PipelineError,
    delay: std::time::Duration,
) {
    let delay_ms = delay.as_millis() as u64;
    let kind = err.kind().as_str();
    if level == Level::ERROR {
        tracing::error!(job_id, command, attempt, kind, delay_ms, error = %err, "retrying job");
    } else if level == Level::WARN {
        tracing::warn!(job_id, command, attempt, kind, delay_ms, error = %err, "retrying job");
    } else if level == Level::INFO {
        tracing::info!(job_id, command, attempt, kind, delay_ms, error = %err, "retrying job");
    } else if level == Level::DEBUG {
        tracing::debug!(job_id, command, attempt, kind, delay_ms, error = %err, "retrying job");
    } else {
        tracing::trace!(job_id, command, attempt, kind, delay_ms, error = %err, "retrying job");
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn submit(&self, app: &str, command: &str, payload: Value) -> Result<String> {
        if app != APP_NAME {
            return Err(PipelineError::Dispatch(format!("unknown app: {}", app)));
        }
        if !self.commands.contains_key(command) {
            return Err(PipelineError::Dispatch(format!("unknown command: {}", command)));
        }
        let id = self.ledger.insert(app, command, &payload).await?;
        self.enqueue(id.clone())?;
        Ok(id)
    }

    async fn get_status(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.ledger.get(job_id).await
    }
}

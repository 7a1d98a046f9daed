//! Whole-source vectorization.
//!
//! Deletes every vector row of the source, splits its text and submits one
//! `embed_chunk` job per chunk. The orchestration step is not retried: a
//! failure here is reported at once instead of risking duplicate dispatch.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chunk::split_text;
use crate::error::{PipelineError, Result};
use crate::jobs::{Command, CommandContext, APP_NAME};
use crate::models::{ensure_record_id, SOURCE_TABLE};
use crate::store::Store;

use super::{elapsed_secs, parse_input, to_output, EMBED_CHUNK, VECTORIZE_SOURCE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizeSourceInput {
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizeSourceOutput {
    pub success: bool,
    pub source_id: String,
    pub total_chunks: usize,
    pub jobs_submitted: usize,
    pub processing_time: f64,
    pub error_message: Option<String>,
}

/// Run the orchestration for one source.
///
/// Never returns an error: failures are reported in the output. Compare
/// `jobs_submitted` with `total_chunks` to detect partial dispatch.
pub async fn vectorize_source(ctx: &CommandContext, source_id: &str) -> VectorizeSourceOutput {
    let start = Instant::now();
    tracing::info!(source_id, "starting vectorization");

    match orchestrate(ctx, source_id).await {
        Ok((total_chunks, jobs_submitted)) => {
            let processing_time = elapsed_secs(start);
            tracing::info!(
                source_id,
                jobs_submitted,
                total_chunks,
                secs = processing_time,
                "vectorization dispatched"
            );
            VectorizeSourceOutput {
                success: true,
                source_id: source_id.to_string(),
                total_chunks,
                jobs_submitted,
                processing_time,
                error_message: None,
            }
        }
        Err(e) => {
            tracing::error!(source_id, error = %e, "vectorization failed");
            VectorizeSourceOutput {
                success: false,
                source_id: source_id.to_string(),
                total_chunks: 0,
                jobs_submitted: 0,
                processing_time: elapsed_secs(start),
                error_message: Some(e.to_string()),
            }
        }
    }
}

async fn orchestrate(ctx: &CommandContext, source_id: &str) -> Result<(usize, usize)> {
    ctx.embedder()?;
    let id = ensure_record_id(SOURCE_TABLE, source_id);
    let source = ctx
        .store
        .get_source(&id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Source '{}'", source_id)))?;
    let text = source.text().ok_or_else(|| {
        PipelineError::invalid(format!("Source {} has no text to vectorize", source_id))
    })?;

    let deleted = ctx.store.delete_source_vectors(&id).await?;
    if deleted > 0 {
        tracing::info!(source_id = %id, deleted, "deleted existing embeddings");
    }

    let chunks = split_text(text, ctx.settings.chunk_size);
    let total = chunks.len();
    tracing::info!(source_id = %id, chunks = total, "split source text");
    if total == 0 {
        return Err(PipelineError::invalid("No chunks created after splitting text"));
    }

    let every = ctx.settings.dispatch_log_every.max(1);
    let mut submitted = 0;
    for (idx, chunk_text) in chunks.into_iter().enumerate() {
        let payload = json!({
            "source_id": id,
            "chunk_index": idx,
            "chunk_text": chunk_text,
        });
        match ctx.queue.submit(APP_NAME, EMBED_CHUNK, payload).await {
            Ok(_) => {
                submitted += 1;
                if (idx + 1) % every == 0 {
                    tracing::info!(source_id = %id, "submitted {}/{} chunk jobs", idx + 1, total);
                }
            }
            Err(e) => {
                tracing::error!(source_id = %id, chunk = idx, error = %e, "failed to submit chunk job");
            }
        }
    }
    Ok((total, submitted))
}

/// Submit a `vectorize_source` job for `source_id` and link it to the source.
pub async fn submit_vectorization(ctx: &CommandContext, source_id: &str) -> Result<String> {
    let id = ensure_record_id(SOURCE_TABLE, source_id);
    let source = ctx
        .store
        .get_source(&id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Source '{}'", source_id)))?;
    if source.text().is_none() {
        return Err(PipelineError::invalid(format!(
            "Source {} has no text to vectorize",
            source_id
        )));
    }

    let job_id = ctx
        .queue
        .submit(APP_NAME, VECTORIZE_SOURCE, json!({ "source_id": id }))
        .await?;
    ctx.store.set_source_command(&id, &job_id).await?;
    tracing::info!(source_id = %id, job_id = %job_id, "vectorization submitted");
    Ok(job_id)
}

/// Number of vector rows currently stored for a source.
pub async fn embedded_chunks(store: &dyn Store, source_id: &str) -> Result<u64> {
    store
        .count_source_vectors(&ensure_record_id(SOURCE_TABLE, source_id))
        .await
}

/// The `vectorize_source` command.
pub struct VectorizeSource;

#[async_trait]
impl Command for VectorizeSource {
    fn name(&self) -> &'static str {
        VECTORIZE_SOURCE
    }

    async fn execute(&self, ctx: &CommandContext, payload: Value) -> Result<Value> {
        let input: VectorizeSourceInput = parse_input(VECTORIZE_SOURCE, payload)?;
        to_output(&vectorize_source(ctx, &input.source_id).await)
    }
}

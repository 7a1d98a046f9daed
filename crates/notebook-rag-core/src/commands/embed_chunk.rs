//! Embed one chunk and persist it as a vector row.
//!
//! This is the only retried command. Transient failures (write conflicts,
//! connection errors, timeouts) propagate as `Err` so the executor can try
//! again under the command's [`RetryPolicy`]; every other failure becomes a
//! permanent `success: false` output on the first attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::embed_one;
use crate::error::Result;
use crate::jobs::{Command, CommandContext, RetryPolicy};
use crate::models::{ensure_record_id, ChunkRecord, SOURCE_TABLE};

use super::{parse_input, to_output, EMBED_CHUNK};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedChunkInput {
    pub source_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedChunkOutput {
    pub success: bool,
    pub source_id: String,
    pub chunk_index: i64,
    pub error_message: Option<String>,
}

/// Embed `input.chunk_text` and insert it at `input.chunk_index`.
///
/// No existence check is made: duplicates are prevented by the
/// vectorization step deleting every prior row for the source first.
pub async fn embed_chunk(ctx: &CommandContext, input: &EmbedChunkInput) -> Result<EmbedChunkOutput> {
    tracing::debug!(
        source_id = %input.source_id,
        chunk = input.chunk_index,
        "processing chunk"
    );

    match insert_chunk(ctx, input).await {
        Ok(()) => {
            tracing::debug!(
                source_id = %input.source_id,
                chunk = input.chunk_index,
                "chunk embedded"
            );
            Ok(EmbedChunkOutput {
                success: true,
                source_id: input.source_id.clone(),
                chunk_index: input.chunk_index,
                error_message: None,
            })
        }
        Err(e) if e.is_transient() => {
            tracing::debug!(
                source_id = %input.source_id,
                chunk = input.chunk_index,
                kind = %e.kind(),
                error = %e,
                "transient chunk failure, leaving it to the retry policy"
            );
            Err(e)
        }
        Err(e) => {
            tracing::error!(
                source_id = %input.source_id,
                chunk = input.chunk_index,
                error = %e,
                "failed to embed chunk"
            );
            Ok(EmbedChunkOutput {
                success: false,
                source_id: input.source_id.clone(),
                chunk_index: input.chunk_index,
                error_message: Some(e.to_string()),
            })
        }
    }
}

async fn insert_chunk(ctx: &CommandContext, input: &EmbedChunkInput) -> Result<()> {
    let embedder = ctx.embedder()?;
    let embedding = embed_one(embedder, &input.chunk_text).await?;
    let record = ChunkRecord {
        source_id: ensure_record_id(SOURCE_TABLE, &input.source_id),
        order: input.chunk_index,
        content: input.chunk_text.clone(),
        embedding,
    };
    ctx.store.insert_vector(&record).await
}

/// The `embed_chunk` command.
pub struct EmbedChunk {
    policy: RetryPolicy,
}

impl EmbedChunk {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Default for EmbedChunk {
    fn default() -> Self {
        Self::new(RetryPolicy::embed_chunk_default())
    }
}

#[async_trait]
impl Command for EmbedChunk {
    fn name(&self) -> &'static str {
        EMBED_CHUNK
    }

    fn retry_policy(&self) -> Option<&RetryPolicy> {
        Some(&self.policy)
    }

    async fn execute(&self, ctx: &CommandContext, payload: Value) -> Result<Value> {
        let input: EmbedChunkInput = parse_input(EMBED_CHUNK, payload)?;
        to_output(&embed_chunk(ctx, &input).await?)
    }
}

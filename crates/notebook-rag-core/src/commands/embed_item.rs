//! Synchronous re-embedding of a single source, note or insight, plus the
//! note-save and insight re-embed paths shared with the rebuild sweep.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::embed_one;
use crate::error::{PipelineError, Result};
use crate::jobs::{Command, CommandContext};
use crate::models::{ensure_record_id, now_ts, ItemKind, Note, INSIGHT_TABLE, NOTE_TABLE, SOURCE_TABLE};

use super::vectorize::{embedded_chunks, vectorize_source};
use super::{elapsed_secs, parse_input, to_output, EMBED_SINGLE_ITEM};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedSingleItemInput {
    pub item_id: String,
    pub item_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedSingleItemOutput {
    pub success: bool,
    pub item_id: String,
    pub item_type: String,
    /// Vector rows present for a source after the run. Always 0 otherwise.
    pub chunks_created: u64,
    pub processing_time: f64,
    pub error_message: Option<String>,
}

/// Persist a note, embedding its content first when a provider is available.
///
/// Blank content is rejected. Without a provider the note is stored with an
/// empty embedding and a warning is logged.
pub async fn save_note(ctx: &CommandContext, note: &mut Note) -> Result<()> {
    note.validate()?;
    match (note.content.as_deref(), ctx.embedder.as_deref()) {
        (Some(content), Some(embedder)) if !content.is_empty() => {
            note.embedding = embed_one(embedder, content).await?;
        }
        (Some(content), None) if !content.is_empty() => {
            tracing::warn!(note_id = %note.id, "no embedding model configured, saving note without embedding");
            note.embedding.clear();
        }
        _ => note.embedding.clear(),
    }
    note.updated_at = now_ts();
    ctx.store.save_note(note).await
}

/// Recompute an insight's embedding from its content and store it.
pub async fn reembed_insight(ctx: &CommandContext, insight_id: &str) -> Result<()> {
    let embedder = ctx.embedder()?;
    let id = ensure_record_id(INSIGHT_TABLE, insight_id);
    let insight = ctx
        .store
        .get_insight(&id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Insight '{}'", insight_id)))?;
    let embedding = embed_one(embedder, &insight.content).await?;
    ctx.store.update_insight_embedding(&id, &embedding).await
}

/// Re-embed one item and report the outcome. Failures land in the output.
pub async fn embed_single_item(
    ctx: &CommandContext,
    item_id: &str,
    item_type: &str,
) -> EmbedSingleItemOutput {
    let start = Instant::now();
    tracing::info!(item_id, item_type, "starting single-item embedding");

    match embed_item(ctx, item_id, item_type).await {
        Ok(chunks_created) => {
            let processing_time = elapsed_secs(start);
            tracing::info!(item_id, item_type, secs = processing_time, "item embedded");
            EmbedSingleItemOutput {
                success: true,
                item_id: item_id.to_string(),
                item_type: item_type.to_string(),
                chunks_created,
                processing_time,
                error_message: None,
            }
        }
        Err(e) => {
            tracing::error!(item_id, item_type, error = %e, "embedding failed");
            EmbedSingleItemOutput {
                success: false,
                item_id: item_id.to_string(),
                item_type: item_type.to_string(),
                chunks_created: 0,
                processing_time: elapsed_secs(start),
                error_message: Some(e.to_string()),
            }
        }
    }
}

async fn embed_item(ctx: &CommandContext, item_id: &str, item_type: &str) -> Result<u64> {
    let kind: ItemKind = item_type.parse()?;
    ctx.embedder()?;

    match kind {
        ItemKind::Source => {
            let id = ensure_record_id(SOURCE_TABLE, item_id);
            let out = vectorize_source(ctx, &id).await;
            if !out.success {
                return Err(PipelineError::Dispatch(
                    out.error_message
                        .unwrap_or_else(|| "vectorization failed".to_string()),
                ));
            }
            let chunks = embedded_chunks(ctx.store.as_ref(), &id).await?;
            tracing::info!(source_id = %id, chunks, "source vectorized");
            Ok(chunks)
        }
        ItemKind::Note => {
            let id = ensure_record_id(NOTE_TABLE, item_id);
            let mut note = ctx
                .store
                .get_note(&id)
                .await?
                .ok_or_else(|| PipelineError::not_found(format!("Note '{}'", item_id)))?;
            save_note(ctx, &mut note).await?;
            Ok(0)
        }
        ItemKind::Insight => {
            reembed_insight(ctx, item_id).await?;
            Ok(0)
        }
    }
}

/// The `embed_single_item` command.
pub struct EmbedSingleItem;

#[async_trait]
impl Command for EmbedSingleItem {
    fn name(&self) -> &'static str {
        EMBED_SINGLE_ITEM
    }

    async fn execute(&self, ctx: &CommandContext, payload: Value) -> Result<Value> {
        let input: EmbedSingleItemInput = parse_input(EMBED_SINGLE_ITEM, payload)?;
        to_output(&embed_single_item(ctx, &input.item_id, &input.item_type).await)
    }
}

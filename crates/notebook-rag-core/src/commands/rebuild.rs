//! Bulk embedding rebuild.
//!
//! Collects candidate ids per category, then re-embeds each item in turn
//! through the same path used on creation. One item failing is counted and
//! the sweep carries on. The command itself is never retried.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::jobs::{Command, CommandContext};
use crate::models::{ItemKind, RebuildMode};
use crate::store::Store;

use super::embed_item::{reembed_insight, save_note};
use super::vectorize::vectorize_source;
use super::{elapsed_secs, parse_input, to_output, REBUILD_EMBEDDINGS};

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildEmbeddingsInput {
    pub mode: RebuildMode,
    #[serde(default = "yes")]
    pub include_sources: bool,
    #[serde(default = "yes")]
    pub include_notes: bool,
    #[serde(default = "yes")]
    pub include_insights: bool,
}

impl RebuildEmbeddingsInput {
    pub fn new(mode: RebuildMode) -> Self {
        Self {
            mode,
            include_sources: true,
            include_notes: true,
            include_insights: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildEmbeddingsOutput {
    pub success: bool,
    pub total_items: usize,
    pub processed_items: usize,
    pub failed_items: usize,
    pub sources_processed: usize,
    pub notes_processed: usize,
    pub insights_processed: usize,
    pub processing_time: f64,
    pub error_message: Option<String>,
}

/// Candidate ids selected for a rebuild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildItems {
    pub sources: Vec<String>,
    pub notes: Vec<String>,
    pub insights: Vec<String>,
}

impl RebuildItems {
    pub fn total(&self) -> usize {
        self.sources.len() + self.notes.len() + self.insights.len()
    }
}

/// Query the candidate ids for each included category.
pub async fn collect_items(store: &dyn Store, input: &RebuildEmbeddingsInput) -> Result<RebuildItems> {
    let mut items = RebuildItems::default();
    if input.include_sources {
        items.sources = store.rebuild_candidates(ItemKind::Source, input.mode).await?;
        tracing::info!(count = items.sources.len(), "collected sources for rebuild");
    }
    if input.include_notes {
        items.notes = store.rebuild_candidates(ItemKind::Note, input.mode).await?;
        tracing::info!(count = items.notes.len(), "collected notes for rebuild");
    }
    if input.include_insights {
        items.insights = store.rebuild_candidates(ItemKind::Insight, input.mode).await?;
        tracing::info!(count = items.insights.len(), "collected insights for rebuild");
    }
    Ok(items)
}

/// Number of items a rebuild with `input` would process right now.
pub async fn estimate_rebuild(store: &dyn Store, input: &RebuildEmbeddingsInput) -> Result<usize> {
    Ok(collect_items(store, input).await?.total())
}

/// Run a rebuild sweep. Never returns an error: failures land in the output.
pub async fn rebuild_embeddings(
    ctx: &CommandContext,
    input: &RebuildEmbeddingsInput,
) -> RebuildEmbeddingsOutput {
    let start = Instant::now();
    tracing::info!(
        mode = %input.mode,
        sources = input.include_sources,
        notes = input.include_notes,
        insights = input.include_insights,
        "starting embedding rebuild"
    );

    match sweep(ctx, input).await {
        Ok(mut out) => {
            out.processing_time = elapsed_secs(start);
            tracing::info!(
                processed = out.processed_items,
                total = out.total_items,
                sources = out.sources_processed,
                notes = out.notes_processed,
                insights = out.insights_processed,
                failed = out.failed_items,
                secs = out.processing_time,
                "rebuild complete"
            );
            out
        }
        Err(e) => {
            tracing::error!(error = %e, "rebuild failed");
            RebuildEmbeddingsOutput {
                success: false,
                processing_time: elapsed_secs(start),
                error_message: Some(e.to_string()),
                ..Default::default()
            }
        }
    }
}

async fn sweep(ctx: &CommandContext, input: &RebuildEmbeddingsInput) -> Result<RebuildEmbeddingsOutput> {
    let embedder = ctx.embedder()?;
    tracing::info!(model = embedder.model_name(), "using embedding model");

    let items = collect_items(ctx.store.as_ref(), input).await?;
    let total_items = items.total();
    tracing::info!(total_items, "items to process");

    let mut out = RebuildEmbeddingsOutput {
        success: true,
        total_items,
        ..Default::default()
    };
    if total_items == 0 {
        tracing::warn!("no items found to rebuild");
        return Ok(out);
    }

    let every = ctx.settings.rebuild_log_every.max(1);

    for (idx, id) in items.sources.iter().enumerate() {
        match rebuild_source(ctx, id).await {
            Ok(()) => out.sources_processed += 1,
            Err(e) => {
                tracing::error!(source_id = %id, error = %e, "failed to re-embed source");
                out.failed_items += 1;
            }
        }
        log_progress(ItemKind::Source, idx + 1, items.sources.len(), every);
    }

    for (idx, id) in items.notes.iter().enumerate() {
        match rebuild_note(ctx, id).await {
            Ok(()) => out.notes_processed += 1,
            Err(e) => {
                tracing::error!(note_id = %id, error = %e, "failed to re-embed note");
                out.failed_items += 1;
            }
        }
        log_progress(ItemKind::Note, idx + 1, items.notes.len(), every);
    }

    for (idx, id) in items.insights.iter().enumerate() {
        match reembed_insight(ctx, id).await {
            Ok(()) => out.insights_processed += 1,
            Err(e) => {
                tracing::error!(insight_id = %id, error = %e, "failed to re-embed insight");
                out.failed_items += 1;
            }
        }
        log_progress(ItemKind::Insight, idx + 1, items.insights.len(), every);
    }

    out.processed_items = out.sources_processed + out.notes_processed + out.insights_processed;
    Ok(out)
}

fn log_progress(kind: ItemKind, done: usize, total: usize, every: usize) {
    if done % every == 0 || done == total {
        tracing::info!(kind = %kind, "progress: {}/{} processed", done, total);
    }
}

async fn rebuild_source(ctx: &CommandContext, id: &str) -> Result<()> {
    let out = vectorize_source(ctx, id).await;
    if out.success {
        Ok(())
    } else {
        Err(PipelineError::Dispatch(
            out.error_message
                .unwrap_or_else(|| "vectorization failed".to_string()),
        ))
    }
}

async fn rebuild_note(ctx: &CommandContext, id: &str) -> Result<()> {
    let mut note = ctx
        .store
        .get_note(id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Note {}", id)))?;
    save_note(ctx, &mut note).await
}

/// The `rebuild_embeddings` command.
pub struct RebuildEmbeddings;

#[async_trait]
impl Command for RebuildEmbeddings {
    fn name(&self) -> &'static str {
        REBUILD_EMBEDDINGS
    }

    async fn execute(&self, ctx: &CommandContext, payload: Value) -> Result<Value> {
        let input: RebuildEmbeddingsInput = parse_input(REBUILD_EMBEDDINGS, payload)?;
        to_output(&rebuild_embeddings(ctx, &input).await)
    }
}

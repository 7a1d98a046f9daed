//! Write-side catalog operations and status views shared by the CLI and
//! the HTTP API.
//!
//! All functions work against a [`CommandContext`], so they see the same
//! store, embedding provider and job queue the pipeline commands do.

use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

use notebook_rag_core::commands::{
    self, embedded_chunks, estimate_rebuild, RebuildEmbeddingsInput, RebuildEmbeddingsOutput,
};
use notebook_rag_core::embedding::embed_one;
use notebook_rag_core::jobs::{CommandContext, JobRecord, JobStatus, APP_NAME};
use notebook_rag_core::models::{
    ensure_record_id, Asset, Note, NoteType, Notebook, Source, SourceInsight, NOTEBOOK_TABLE,
    SOURCE_TABLE,
};
use notebook_rag_core::{PipelineError, Result};

pub async fn create_notebook(ctx: &CommandContext, name: &str, description: &str) -> Result<Notebook> {
    let notebook = Notebook::new(name, description)?;
    ctx.store.save_notebook(&notebook).await?;
    tracing::info!(notebook_id = %notebook.id, "notebook created");
    Ok(notebook)
}

async fn require_notebook(ctx: &CommandContext, notebook_id: &str) -> Result<String> {
    let id = ensure_record_id(NOTEBOOK_TABLE, notebook_id);
    if ctx.store.get_notebook(&id).await?.is_none() {
        return Err(PipelineError::not_found(format!("Notebook '{}'", notebook_id)));
    }
    Ok(id)
}

/// Input for [`create_source`].
#[derive(Debug, Clone, Default)]
pub struct NewSource {
    pub title: Option<String>,
    /// Inline text. Takes precedence over `file`.
    pub text: Option<String>,
    /// A local text file; its contents become the source text and the
    /// source owns the file.
    pub file: Option<PathBuf>,
    pub url: Option<String>,
    pub topics: Vec<String>,
    pub notebook_id: Option<String>,
    /// Submit a vectorization job right after saving.
    pub embed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSource {
    pub source: Source,
    pub command_id: Option<String>,
}

fn read_text_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        PipelineError::invalid(format!("Cannot read {}: {}", path.display(), e))
    })
}

pub async fn create_source(ctx: &CommandContext, new: NewSource) -> Result<CreatedSource> {
    let notebook_id = match new.notebook_id.as_deref() {
        Some(nb) => Some(require_notebook(ctx, nb).await?),
        None => None,
    };

    let text = match (new.text, new.file.as_deref()) {
        (Some(text), _) => Some(text),
        (None, Some(path)) => Some(read_text_file(path)?),
        (None, None) => None,
    };
    let title = new.title.or_else(|| {
        new.file
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    });

    let mut source = Source::new(title, text);
    source.topics = new.topics;
    if new.file.is_some() || new.url.is_some() {
        source.asset = Some(Asset {
            file_path: new.file.map(|p| p.display().to_string()),
            url: new.url,
        });
    }
    ctx.store.save_source(&source).await?;
    if let Some(nb) = notebook_id.as_deref() {
        ctx.store.add_source_to_notebook(&source.id, nb).await?;
    }
    tracing::info!(source_id = %source.id, has_text = source.text().is_some(), "source created");

    let command_id = if new.embed {
        let job_id = commands::submit_vectorization(ctx, &source.id).await?;
        source.command = Some(job_id.clone());
        Some(job_id)
    } else {
        None
    };

    Ok(CreatedSource { source, command_id })
}

/// Delete a source with its vectors, insights and notebook links, and
/// remove the asset file it owns.
pub async fn delete_source(ctx: &CommandContext, source_id: &str) -> Result<()> {
    let id = ensure_record_id(SOURCE_TABLE, source_id);
    let source = ctx
        .store
        .get_source(&id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Source '{}'", source_id)))?;

    if let Some(path) = source.asset.as_ref().and_then(|a| a.file_path.as_deref()) {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::info!(source_id = %id, path, "deleted source file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(source_id = %id, path, "source file already gone")
            }
            Err(e) => tracing::warn!(source_id = %id, path, error = %e, "could not delete source file"),
        }
    }

    ctx.store.delete_source(&id).await?;
    tracing::info!(source_id = %id, "source deleted");
    Ok(())
}

pub async fn add_note(
    ctx: &CommandContext,
    title: Option<String>,
    content: &str,
    note_type: Option<NoteType>,
    notebook_id: Option<&str>,
) -> Result<Note> {
    let notebook_id = match notebook_id {
        Some(nb) => Some(require_notebook(ctx, nb).await?),
        None => None,
    };
    let mut note = Note::new(title, Some(content.to_string()), note_type);
    commands::save_note(ctx, &mut note).await?;
    if let Some(nb) = notebook_id.as_deref() {
        ctx.store.add_note_to_notebook(&note.id, nb).await?;
    }
    tracing::info!(note_id = %note.id, embedded = !note.embedding.is_empty(), "note saved");
    Ok(note)
}

/// Attach an insight to a source, embedding it when a provider is configured.
pub async fn add_insight(
    ctx: &CommandContext,
    source_id: &str,
    insight_type: &str,
    content: &str,
) -> Result<SourceInsight> {
    let source_id = ensure_record_id(SOURCE_TABLE, source_id);
    if ctx.store.get_source(&source_id).await?.is_none() {
        return Err(PipelineError::not_found(format!("Source '{}'", source_id)));
    }
    let mut insight = SourceInsight::new(&source_id, insight_type, content)?;
    match ctx.embedder.as_deref() {
        Some(embedder) => insight.embedding = embed_one(embedder, content).await?,
        None => tracing::warn!(
            source_id = %source_id,
            "no embedding model configured, saving insight without embedding"
        ),
    }
    ctx.store.save_insight(&insight).await?;
    Ok(insight)
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub embedded_chunks: u64,
    pub command_id: Option<String>,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
}

pub async fn source_status(ctx: &CommandContext, source_id: &str) -> Result<SourceStatus> {
    let id = ensure_record_id(SOURCE_TABLE, source_id);
    let source = ctx
        .store
        .get_source(&id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Source '{}'", source_id)))?;
    let chunks = embedded_chunks(ctx.store.as_ref(), &id).await?;

    let job = match source.command.as_deref() {
        Some(job_id) => ctx.queue.get_status(job_id).await?,
        None => None,
    };
    Ok(SourceStatus {
        source_id: id,
        embedded_chunks: chunks,
        command_id: source.command,
        status: job.as_ref().map(|j| j.status),
        error: job.and_then(|j| j.error),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildSubmission {
    pub command_id: String,
    pub total_items: usize,
    pub message: String,
}

/// Count the candidates and submit one `rebuild_embeddings` job.
pub async fn submit_rebuild(
    ctx: &CommandContext,
    input: &RebuildEmbeddingsInput,
) -> Result<RebuildSubmission> {
    ctx.embedder()?;
    let total_items = estimate_rebuild(ctx.store.as_ref(), input).await?;
    let command_id = ctx
        .queue
        .submit(
            APP_NAME,
            commands::REBUILD_EMBEDDINGS,
            serde_json::to_value(input)?,
        )
        .await?;
    tracing::info!(command_id = %command_id, mode = %input.mode, total_items, "rebuild submitted");
    Ok(RebuildSubmission {
        command_id,
        total_items,
        message: format!("Rebuild started, approximately {} items to process", total_items),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildProgress {
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildStats {
    pub sources: usize,
    pub notes: usize,
    pub insights: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildStatus {
    pub command_id: String,
    pub status: JobStatus,
    pub progress: Option<RebuildProgress>,
    pub stats: Option<RebuildStats>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

fn rfc3339(ts: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(ts, 0).map(|t| t.to_rfc3339())
}

fn percentage(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (processed as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Project a rebuild job record into the status view.
pub fn rebuild_status_from(job: &JobRecord) -> Result<RebuildStatus> {
    if job.command != commands::REBUILD_EMBEDDINGS {
        return Err(PipelineError::invalid(format!(
            "Command {} is not a rebuild",
            job.id
        )));
    }
    let output: Option<RebuildEmbeddingsOutput> = job
        .result
        .clone()
        .map(serde_json::from_value)
        .transpose()?;

    let progress = output.as_ref().map(|o| RebuildProgress {
        processed: o.processed_items,
        total: o.total_items,
        percentage: percentage(o.processed_items, o.total_items),
    });
    let stats = output.as_ref().map(|o| RebuildStats {
        sources: o.sources_processed,
        notes: o.notes_processed,
        insights: o.insights_processed,
        failed: o.failed_items,
    });
    let error_message = job
        .error
        .clone()
        .or_else(|| output.and_then(|o| o.error_message));

    Ok(RebuildStatus {
        command_id: job.id.clone(),
        status: job.status,
        progress,
        stats,
        started_at: rfc3339(job.created),
        completed_at: if job.status.is_terminal() {
            rfc3339(job.updated)
        } else {
            None
        },
        error_message,
    })
}

pub async fn rebuild_status(ctx: &CommandContext, command_id: &str) -> Result<RebuildStatus> {
    let job = ctx
        .queue
        .get_status(command_id)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Command '{}'", command_id)))?;
    rebuild_status_from(&job)
}

/// A job record as rendered by `GET /api/commands/{id}` and `nbrag status`.
pub fn job_view(job: &JobRecord) -> serde_json::Value {
    json!({
        "job_id": job.id,
        "app": job.app,
        "command": job.command,
        "status": job.status,
        "attempts": job.attempts,
        "result": job.result,
        "error_message": job.error,
        "created": rfc3339(job.created),
        "updated": rfc3339(job.updated),
    })
}

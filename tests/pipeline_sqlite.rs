//! The pipeline end to end: SQLite store, persisted ledger, real worker
//! pool, fake embedding providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use notebook_rag::catalog::{self, NewSource};
use notebook_rag::config::{parse_config, Config};
use notebook_rag::pipeline::Pipeline;
use notebook_rag_core::chunk::split_text;
use notebook_rag_core::commands::{self, RebuildEmbeddingsInput};
use notebook_rag_core::context::build_notebook_context;
use notebook_rag_core::embedding::EmbeddingProvider;
use notebook_rag_core::jobs::JobStatus;
use notebook_rag_core::models::RebuildMode;
use notebook_rag_core::{PipelineError, Result};
use tempfile::TempDir;

/// Vector of the text's length and word count. Fails the first
/// `fail_first` calls with a connection error.
struct FakeEmbedder {
    calls: AtomicUsize,
    fail_first: usize,
}

impl FakeEmbedder {
    fn new() -> Arc<Self> {
        Self::flaky(0)
    }

    fn flaky(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(PipelineError::Connection("connection reset".into()));
        }
        Ok(texts
            .iter()
            .map(|t| vec![t.len() as f32, t.split_whitespace().count() as f32])
            .collect())
    }
}

const LONG_TEXT: &str = "Retrieval augmented generation pairs a language model with a store of \
documents. Each document is split into chunks, every chunk is embedded, and at question time \
the closest chunks are handed to the model. Chunk boundaries matter: too small and the model \
loses context, too large and retrieval gets imprecise. Overlap between neighbouring chunks \
keeps sentences that straddle a boundary retrievable from either side.";

fn test_config(tmp: &TempDir) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "{}"

[chunking]
chunk_size = 25

[jobs]
workers = 3

[jobs.embed_chunk]
max_attempts = 5
wait_min_secs = 0
wait_max_secs = 0
"#,
        tmp.path().join("data").join("nbrag.sqlite").display()
    ))
    .unwrap()
}

async fn start(tmp: &TempDir, embedder: Option<Arc<FakeEmbedder>>) -> Pipeline {
    let config = test_config(tmp);
    let pool = notebook_rag::db::connect(&config).await.unwrap();
    notebook_rag::migrate::apply(&pool).await.unwrap();
    let embedder = embedder.map(|e| e as Arc<dyn EmbeddingProvider>);
    Pipeline::start(&config, pool, embedder).await.unwrap()
}

async fn add_text_source(pipeline: &Pipeline, text: &str, notebook_id: Option<String>) -> String {
    catalog::create_source(
        &pipeline.ctx,
        NewSource {
            title: Some("Notes on RAG".into()),
            text: Some(text.into()),
            notebook_id,
            ..NewSource::default()
        },
    )
    .await
    .unwrap()
    .source
    .id
}

#[tokio::test]
async fn revectorizing_replaces_rather_than_appends() {
    let tmp = TempDir::new().unwrap();
    let pipeline = start(&tmp, Some(FakeEmbedder::new())).await;
    let source_id = add_text_source(&pipeline, LONG_TEXT, None).await;

    let first_job = commands::submit_vectorization(&pipeline.ctx, &source_id)
        .await
        .unwrap();
    pipeline.drain().await;
    let first = commands::embedded_chunks(pipeline.ctx.store.as_ref(), &source_id)
        .await
        .unwrap();
    assert!(first > 1, "expected several chunks, got {}", first);

    commands::submit_vectorization(&pipeline.ctx, &source_id)
        .await
        .unwrap();
    pipeline.drain().await;
    let second = commands::embedded_chunks(pipeline.ctx.store.as_ref(), &source_id)
        .await
        .unwrap();
    assert_eq!(first, second);

    let orders: Vec<i64> = pipeline
        .ctx
        .store
        .source_vectors(&source_id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.order)
        .collect();
    assert_eq!(orders, (0..second as i64).collect::<Vec<_>>());

    let job = pipeline.ctx.queue.get_status(&first_job).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.unwrap()["total_chunks"], first);
}

#[tokio::test]
async fn chunk_jobs_ride_out_connection_errors() {
    let tmp = TempDir::new().unwrap();
    let embedder = FakeEmbedder::flaky(3);
    let pipeline = start(&tmp, Some(embedder.clone())).await;
    let source_id = add_text_source(&pipeline, LONG_TEXT, None).await;

    commands::submit_vectorization(&pipeline.ctx, &source_id)
        .await
        .unwrap();
    pipeline.drain().await;

    let status = catalog::source_status(&pipeline.ctx, &source_id)
        .await
        .unwrap();
    let total = split_text(LONG_TEXT, pipeline.config.chunking.chunk_size).len();
    assert_eq!(status.embedded_chunks as usize, total);
    assert_eq!(status.status, Some(JobStatus::Completed));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), total + 3);
}

#[tokio::test]
async fn vectorize_job_without_text_fails_cleanly() {
    let tmp = TempDir::new().unwrap();
    let pipeline = start(&tmp, Some(FakeEmbedder::new())).await;
    let created = catalog::create_source(&pipeline.ctx, NewSource::default())
        .await
        .unwrap();

    let err = commands::submit_vectorization(&pipeline.ctx, &created.source.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
}

#[tokio::test]
async fn rebuild_existing_versus_all() {
    let tmp = TempDir::new().unwrap();
    let pipeline = start(&tmp, Some(FakeEmbedder::new())).await;
    let ctx = &pipeline.ctx;

    let embedded = add_text_source(&pipeline, LONG_TEXT, None).await;
    add_text_source(&pipeline, "A second, never embedded source.", None).await;
    commands::submit_vectorization(ctx, &embedded).await.unwrap();
    pipeline.drain().await;

    let existing = RebuildEmbeddingsInput {
        include_notes: false,
        include_insights: false,
        ..RebuildEmbeddingsInput::new(RebuildMode::Existing)
    };
    let submitted = catalog::submit_rebuild(ctx, &existing).await.unwrap();
    assert_eq!(submitted.total_items, 1);
    pipeline.drain().await;
    let status = catalog::rebuild_status(ctx, &submitted.command_id)
        .await
        .unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    let progress = status.progress.unwrap();
    assert_eq!((progress.processed, progress.total), (1, 1));
    assert_eq!(progress.percentage, 100.0);

    let all = RebuildEmbeddingsInput {
        mode: RebuildMode::All,
        ..existing
    };
    let submitted = catalog::submit_rebuild(ctx, &all).await.unwrap();
    assert_eq!(submitted.total_items, 2);
    pipeline.drain().await;
    let status = catalog::rebuild_status(ctx, &submitted.command_id)
        .await
        .unwrap();
    assert_eq!(status.stats.unwrap().sources, 2);
}

#[tokio::test]
async fn rebuild_requires_an_embedding_model() {
    let tmp = TempDir::new().unwrap();
    let pipeline = start(&tmp, None).await;
    let err = catalog::submit_rebuild(
        &pipeline.ctx,
        &RebuildEmbeddingsInput::new(RebuildMode::All),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::NoEmbeddingModel));
}

#[tokio::test]
async fn notes_and_insights_are_embedded_on_save() {
    let tmp = TempDir::new().unwrap();
    let pipeline = start(&tmp, Some(FakeEmbedder::new())).await;
    let ctx = &pipeline.ctx;

    let notebook = catalog::create_notebook(ctx, "Thesis", "").await.unwrap();
    let source_id = add_text_source(&pipeline, LONG_TEXT, Some(notebook.id.clone())).await;

    let note = catalog::add_note(ctx, None, "remember the overlap", None, Some(&notebook.id))
        .await
        .unwrap();
    assert_eq!(note.embedding.len(), 2);

    let insight = catalog::add_insight(ctx, &source_id, "summary", "chunks with overlap")
        .await
        .unwrap();
    let stored = ctx.store.get_insight(&insight.id).await.unwrap().unwrap();
    assert_eq!(stored.embedding.len(), 2);

    let err = catalog::add_note(ctx, None, "   ", None, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
}

#[tokio::test]
async fn notebook_context_defaults_to_short_detail() {
    let tmp = TempDir::new().unwrap();
    let pipeline = start(&tmp, None).await;
    let ctx = &pipeline.ctx;

    let notebook = catalog::create_notebook(ctx, "Thesis", "").await.unwrap();
    let a = add_text_source(&pipeline, LONG_TEXT, Some(notebook.id.clone())).await;
    add_text_source(&pipeline, "short one", Some(notebook.id.clone())).await;
    catalog::add_note(ctx, Some("todo".into()), &"x".repeat(300), None, Some(&notebook.id))
        .await
        .unwrap();
    catalog::add_insight(ctx, &a, "summary", "chunking and overlap")
        .await
        .unwrap();

    let weights = ctx.settings.priority_weights;
    let response = build_notebook_context(ctx.store.as_ref(), &notebook.id, None, None, weights)
        .await
        .unwrap();
    assert_eq!(response.sources.len(), 2);
    assert_eq!(response.notes.len(), 1);
    assert_eq!(response.notebook_id.as_deref(), Some(notebook.id.as_str()));
    for source in &response.sources {
        assert!(source.get("full_text").is_none());
    }
    let with_insight = response
        .sources
        .iter()
        .find(|s| s["id"] == a.as_str())
        .unwrap();
    assert_eq!(with_insight["insights"].as_array().unwrap().len(), 1);
    assert_eq!(response.notes[0]["content"].as_str().unwrap().len(), 100);

    let bounded = build_notebook_context(ctx.store.as_ref(), &notebook.id, None, Some(1), weights)
        .await
        .unwrap();
    assert_eq!(bounded.total_items, 1);
    assert_eq!(bounded.sources.len(), 1);
}

#[tokio::test]
async fn deleting_a_source_removes_vectors_and_owned_file() {
    let tmp = TempDir::new().unwrap();
    let pipeline = start(&tmp, Some(FakeEmbedder::new())).await;
    let ctx = &pipeline.ctx;

    let file = tmp.path().join("paper.txt");
    std::fs::write(&file, LONG_TEXT).unwrap();
    let created = catalog::create_source(
        ctx,
        NewSource {
            file: Some(file.clone()),
            embed: true,
            ..NewSource::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(created.source.title.as_deref(), Some("paper.txt"));
    assert!(created.command_id.is_some());
    pipeline.drain().await;
    let id = created.source.id;
    assert!(commands::embedded_chunks(ctx.store.as_ref(), &id).await.unwrap() > 0);

    catalog::delete_source(ctx, &id).await.unwrap();
    assert!(!file.exists());
    assert!(ctx.store.get_source(&id).await.unwrap().is_none());
    assert_eq!(ctx.store.count_source_vectors(&id).await.unwrap(), 0);

    let err = catalog::delete_source(ctx, &id).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn unfinished_jobs_resume_after_restart() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = notebook_rag::db::connect(&config).await.unwrap();
    notebook_rag::migrate::apply(&pool).await.unwrap();

    let ledger = notebook_rag::ledger::JobLedger::new(pool.clone());
    let source_id = {
        let store = notebook_rag::sqlite_store::SqliteStore::new(pool.clone());
        let source = notebook_rag_core::models::Source::new(None, Some(LONG_TEXT.into()));
        notebook_rag_core::store::Store::save_source(&store, &source)
            .await
            .unwrap();
        source.id
    };
    let job_id = ledger
        .insert(
            notebook_rag_core::jobs::APP_NAME,
            commands::VECTORIZE_SOURCE,
            &serde_json::json!({ "source_id": source_id }),
        )
        .await
        .unwrap();

    let embedder: Arc<dyn EmbeddingProvider> = FakeEmbedder::new();
    let pipeline = Pipeline::start(&config, pool, Some(embedder))
        .await
        .unwrap();
    assert_eq!(pipeline.resume().await.unwrap(), 1);
    pipeline.drain().await;

    let job = pipeline.ctx.queue.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(
        commands::embedded_chunks(pipeline.ctx.store.as_ref(), &source_id)
            .await
            .unwrap()
            > 1
    );
}

#[tokio::test]
async fn interrupted_vectorize_is_not_rerun_on_resume() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = notebook_rag::db::connect(&config).await.unwrap();
    notebook_rag::migrate::apply(&pool).await.unwrap();

    let ledger = notebook_rag::ledger::JobLedger::new(pool.clone());
    let source_id = {
        let store = notebook_rag::sqlite_store::SqliteStore::new(pool.clone());
        let source = notebook_rag_core::models::Source::new(None, Some(LONG_TEXT.into()));
        notebook_rag_core::store::Store::save_source(&store, &source)
            .await
            .unwrap();
        source.id
    };
    let app = notebook_rag_core::jobs::APP_NAME;

    // The earlier process died after dispatching two chunk jobs, one of
    // which had already started.
    let vectorize_id = ledger
        .insert(
            app,
            commands::VECTORIZE_SOURCE,
            &serde_json::json!({ "source_id": source_id }),
        )
        .await
        .unwrap();
    ledger.start_attempt(&vectorize_id, 1).await.unwrap();
    let mut chunk_ids = Vec::new();
    for (index, text) in ["first chunk text", "second chunk text"].iter().enumerate() {
        let id = ledger
            .insert(
                app,
                commands::EMBED_CHUNK,
                &serde_json::json!({
                    "source_id": source_id,
                    "chunk_index": index,
                    "chunk_text": text,
                }),
            )
            .await
            .unwrap();
        chunk_ids.push(id);
    }
    ledger.start_attempt(&chunk_ids[1], 1).await.unwrap();

    let embedder: Arc<dyn EmbeddingProvider> = FakeEmbedder::new();
    let pipeline = Pipeline::start(&config, pool, Some(embedder))
        .await
        .unwrap();
    assert_eq!(pipeline.resume().await.unwrap(), 2);
    pipeline.drain().await;

    let vectorize = pipeline
        .ctx
        .queue
        .get_status(&vectorize_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vectorize.status, JobStatus::Failed);
    assert_eq!(vectorize.attempts, 1);
    assert_eq!(
        vectorize.error.as_deref(),
        Some(notebook_rag::queue::INTERRUPTED)
    );

    for id in &chunk_ids {
        let job = pipeline.ctx.queue.get_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
    let resumed_chunk = pipeline
        .ctx
        .queue
        .get_status(&chunk_ids[1])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resumed_chunk.attempts, 2);

    let mut orders: Vec<i64> = pipeline
        .ctx
        .store
        .source_vectors(&source_id)
        .await
        .unwrap()
        .iter()
        .map(|v| v.order)
        .collect();
    orders.sort();
    assert_eq!(orders, vec![0, 1]);
}

#[tokio::test]
async fn submit_only_pipeline_leaves_jobs_queued() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let recorder = Pipeline::open_submit_only(&config).await.unwrap();
    let source_id = add_text_source(&recorder, LONG_TEXT, None).await;
    let job_id = recorder
        .ctx
        .queue
        .submit(
            notebook_rag_core::jobs::APP_NAME,
            commands::VECTORIZE_SOURCE,
            serde_json::json!({ "source_id": source_id }),
        )
        .await
        .unwrap();
    recorder.drain().await;
    assert_eq!(recorder.resume().await.unwrap(), 0);
    let job = recorder.ctx.queue.get_status(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 0);
}

//! Wiring: one SQLite pool shared by the store and the job ledger, the
//! configured embedding provider, and a worker pool.
//!
//! Processes that wait for their jobs ([`Pipeline::open`]) run workers and
//! may [`resume`](Pipeline::resume) leftovers. Short-lived processes that
//! only record work ([`Pipeline::open_submit_only`]) start none, so a job is
//! never cut off halfway by the process exiting.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use notebook_rag_core::commands;
use notebook_rag_core::embedding::EmbeddingProvider;
use notebook_rag_core::jobs::CommandContext;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::ledger::JobLedger;
use crate::migrate;
use crate::queue::LocalJobQueue;
use crate::sqlite_store::SqliteStore;

pub struct Pipeline {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub queue: Arc<LocalJobQueue>,
    pub ctx: CommandContext,
}

impl Pipeline {
    /// Connect, migrate, build the configured provider, start the workers.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let embedder = create_provider(&config.embedding)?;
        Self::start(config, pool, embedder).await
    }

    /// Like [`Pipeline::open`] but without workers: submitted jobs stay
    /// `queued` for the next process that resumes them.
    pub async fn open_submit_only(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let embedder = create_provider(&config.embedding)?;
        Self::launch(config, pool, embedder, 0).await
    }

    /// Like [`Pipeline::open`] on an existing, migrated pool with an
    /// explicit provider.
    pub async fn start(
        config: &Config,
        pool: SqlitePool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        Self::launch(config, pool, embedder, config.jobs.workers).await
    }

    async fn launch(
        config: &Config,
        pool: SqlitePool,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        workers: usize,
    ) -> Result<Self> {
        let settings = config.pipeline_settings();
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let (queue, ctx) = LocalJobQueue::start(
            JobLedger::new(pool.clone()),
            commands::builtin(&settings),
            store,
            embedder,
            settings,
            workers,
        )
        .await?;
        tracing::debug!(
            workers,
            provider = %config.embedding.provider,
            "pipeline started"
        );
        Ok(Self {
            config: Arc::new(config.clone()),
            pool,
            queue,
            ctx,
        })
    }

    /// Re-enqueue jobs left behind by an earlier process.
    pub async fn resume(&self) -> Result<usize> {
        Ok(self.queue.resume_unfinished().await?)
    }

    /// Wait for every queued job, including jobs those jobs submit.
    pub async fn drain(&self) {
        self.queue.wait_idle().await;
    }
}

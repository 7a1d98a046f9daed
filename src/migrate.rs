use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS notebooks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        archived INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id TEXT PRIMARY KEY,
        title TEXT,
        topics_json TEXT NOT NULL DEFAULT '[]',
        full_text TEXT,
        asset_file_path TEXT,
        asset_url TEXT,
        command TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_notebooks (
        source_id TEXT NOT NULL,
        notebook_id TEXT NOT NULL,
        PRIMARY KEY (source_id, notebook_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        title TEXT,
        note_type TEXT,
        content TEXT,
        embedding BLOB,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS note_notebooks (
        note_id TEXT NOT NULL,
        notebook_id TEXT NOT NULL,
        PRIMARY KEY (note_id, notebook_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_insights (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        insight_type TEXT NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_embeddings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id TEXT NOT NULL,
        chunk_order INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS command_jobs (
        id TEXT PRIMARY KEY,
        app TEXT NOT NULL,
        command TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        status TEXT NOT NULL,
        result_json TEXT,
        error TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        created INTEGER NOT NULL,
        updated INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_source_embeddings_source ON source_embeddings(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_source_insights_source ON source_insights(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_source_notebooks_notebook ON source_notebooks(notebook_id)",
    "CREATE INDEX IF NOT EXISTS idx_note_notebooks_notebook ON note_notebooks(notebook_id)",
    "CREATE INDEX IF NOT EXISTS idx_command_jobs_status ON command_jobs(status)",
];

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

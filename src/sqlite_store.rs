//! SQLite implementation of the core [`Store`] trait.
//!
//! Vectors are stored as little-endian f32 BLOBs. Errors are classified so
//! the job runner can tell contention from real failures:
//!
//! | sqlx error | Pipeline kind |
//! |------------|---------------|
//! | `SQLITE_BUSY` / `SQLITE_LOCKED` (any extended code), "database is locked" | `WriteConflict` |
//! | pool acquire timeout | `Timeout` |
//! | I/O, closed pool | `Connection` |
//! | anything else | `Storage` |

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use notebook_rag_core::embedding::{blob_to_vec, vec_to_blob};
use notebook_rag_core::models::{
    Asset, ChunkRecord, ItemKind, Note, NoteType, Notebook, RebuildMode, Source, SourceInsight,
};
use notebook_rag_core::store::Store;
use notebook_rag_core::{PipelineError, Result};

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

/// Classify a sqlx error for retry purposes.
pub fn map_sqlx(err: sqlx::Error) -> PipelineError {
    match &err {
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|c| c.parse::<i64>().ok())
                .map(|c| c & 0xff);
            if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
                || is_lock_message(db.message())
            {
                PipelineError::WriteConflict(db.message().to_string())
            } else {
                PipelineError::Storage(db.message().to_string())
            }
        }
        sqlx::Error::PoolTimedOut => PipelineError::Timeout(err.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed => PipelineError::Connection(err.to_string()),
        _ => PipelineError::Storage(err.to_string()),
    }
}

fn is_lock_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("database is busy")
}

fn note_type_str(t: Option<NoteType>) -> Option<&'static str> {
    t.map(|t| match t {
        NoteType::Human => "human",
        NoteType::Ai => "ai",
    })
}

fn parse_note_type(s: Option<String>) -> Option<NoteType> {
    match s.as_deref() {
        Some("human") => Some(NoteType::Human),
        Some("ai") => Some(NoteType::Ai),
        _ => None,
    }
}

fn embedding_from(row: &SqliteRow, column: &str) -> Vec<f32> {
    row.get::<Option<Vec<u8>>, _>(column)
        .map(|b| blob_to_vec(&b))
        .unwrap_or_default()
}

fn notebook_from_row(row: &SqliteRow) -> Notebook {
    Notebook {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        archived: row.get::<i64, _>("archived") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let topics_json: String = row.get("topics_json");
    let file_path: Option<String> = row.get("asset_file_path");
    let url: Option<String> = row.get("asset_url");
    let asset = if file_path.is_some() || url.is_some() {
        Some(Asset { file_path, url })
    } else {
        None
    };
    Ok(Source {
        id: row.get("id"),
        title: row.get("title"),
        topics: serde_json::from_str(&topics_json)?,
        full_text: row.get("full_text"),
        asset,
        command: row.get("command"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn note_from_row(row: &SqliteRow) -> Note {
    Note {
        id: row.get("id"),
        title: row.get("title"),
        note_type: parse_note_type(row.get("note_type")),
        content: row.get("content"),
        embedding: embedding_from(row, "embedding"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn insight_from_row(row: &SqliteRow) -> SourceInsight {
    SourceInsight {
        id: row.get("id"),
        source_id: row.get("source_id"),
        insight_type: row.get("insight_type"),
        content: row.get("content"),
        embedding: embedding_from(row, "embedding"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// [`Store`] backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_notebook(&self, notebook: &Notebook) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notebooks (id, name, description, archived, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                archived = excluded.archived,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&notebook.id)
        .bind(&notebook.name)
        .bind(&notebook.description)
        .bind(notebook.archived as i64)
        .bind(notebook.created_at)
        .bind(notebook.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_notebook(&self, id: &str) -> Result<Option<Notebook>> {
        let row = sqlx::query("SELECT * FROM notebooks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(row.as_ref().map(notebook_from_row))
    }

    async fn notebook_sources(&self, notebook_id: &str) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM sources s
            JOIN source_notebooks l ON l.source_id = s.id
            WHERE l.notebook_id = ?
            ORDER BY s.updated_at DESC
            "#,
        )
        .bind(notebook_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(source_from_row).collect()
    }

    async fn notebook_notes(&self, notebook_id: &str) -> Result<Vec<Note>> {
        let rows = sqlx::query(
            r#"
            SELECT n.* FROM notes n
            JOIN note_notebooks l ON l.note_id = n.id
            WHERE l.notebook_id = ?
            ORDER BY n.updated_at DESC
            "#,
        )
        .bind(notebook_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.iter().map(note_from_row).collect())
    }

    async fn add_source_to_notebook(&self, source_id: &str, notebook_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO source_notebooks (source_id, notebook_id) VALUES (?, ?)")
            .bind(source_id)
            .bind(notebook_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn add_note_to_notebook(&self, note_id: &str, notebook_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO note_notebooks (note_id, notebook_id) VALUES (?, ?)")
            .bind(note_id)
            .bind(notebook_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn save_source(&self, source: &Source) -> Result<()> {
        let topics_json = serde_json::to_string(&source.topics)?;
        let (file_path, url) = match &source.asset {
            Some(a) => (a.file_path.clone(), a.url.clone()),
            None => (None, None),
        };
        sqlx::query(
            r#"
            INSERT INTO sources (id, title, topics_json, full_text, asset_file_path, asset_url,
                                 command, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                topics_json = excluded.topics_json,
                full_text = excluded.full_text,
                asset_file_path = excluded.asset_file_path,
                asset_url = excluded.asset_url,
                command = excluded.command,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&source.id)
        .bind(&source.title)
        .bind(&topics_json)
        .bind(&source.full_text)
        .bind(&file_path)
        .bind(&url)
        .bind(&source.command)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for sql in [
            "DELETE FROM source_embeddings WHERE source_id = ?",
            "DELETE FROM source_insights WHERE source_id = ?",
            "DELETE FROM source_notebooks WHERE source_id = ?",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        let deleted = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .rows_affected();
        tx.commit().await.map_err(map_sqlx)?;
        Ok(deleted > 0)
    }

    async fn set_source_command(&self, source_id: &str, job_id: &str) -> Result<()> {
        let updated = sqlx::query("UPDATE sources SET command = ?, updated_at = ? WHERE id = ?")
            .bind(job_id)
            .bind(notebook_rag_core::models::now_ts())
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?
            .rows_affected();
        if updated == 0 {
            return Err(PipelineError::not_found(format!("Source {}", source_id)));
        }
        Ok(())
    }

    async fn save_insight(&self, insight: &SourceInsight) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_insights (id, source_id, insight_type, content, embedding,
                                         created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                insight_type = excluded.insight_type,
                content = excluded.content,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&insight.id)
        .bind(&insight.source_id)
        .bind(&insight.insight_type)
        .bind(&insight.content)
        .bind(vec_to_blob(&insight.embedding))
        .bind(insight.created_at)
        .bind(insight.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_insight(&self, id: &str) -> Result<Option<SourceInsight>> {
        let row = sqlx::query("SELECT * FROM source_insights WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(row.as_ref().map(insight_from_row))
    }

    async fn source_insights(&self, source_id: &str) -> Result<Vec<SourceInsight>> {
        let rows = sqlx::query(
            "SELECT * FROM source_insights WHERE source_id = ? ORDER BY created_at, id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.iter().map(insight_from_row).collect())
    }

    async fn update_insight_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let updated = sqlx::query("UPDATE source_insights SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(embedding))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?
            .rows_affected();
        if updated == 0 {
            return Err(PipelineError::not_found(format!("Insight {}", id)));
        }
        Ok(())
    }

    async fn save_note(&self, note: &Note) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notes (id, title, note_type, content, embedding, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                note_type = excluded.note_type,
                content = excluded.content,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&note.id)
        .bind(&note.title)
        .bind(note_type_str(note.note_type))
        .bind(&note.content)
        .bind(vec_to_blob(&note.embedding))
        .bind(note.created_at)
        .bind(note.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let row = sqlx::query("SELECT * FROM notes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(row.as_ref().map(note_from_row))
    }

    async fn delete_source_vectors(&self, source_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM source_embeddings WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn insert_vector(&self, record: &ChunkRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO source_embeddings (source_id, chunk_order, content, embedding) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.source_id)
        .bind(record.order)
        .bind(&record.content)
        .bind(vec_to_blob(&record.embedding))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn count_source_vectors(&self, source_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM source_embeddings WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(count as u64)
    }

    async fn source_vectors(&self, source_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            "SELECT source_id, chunk_order, content, embedding FROM source_embeddings WHERE source_id = ? ORDER BY chunk_order",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows
            .iter()
            .map(|row| ChunkRecord {
                source_id: row.get("source_id"),
                order: row.get("chunk_order"),
                content: row.get("content"),
                embedding: embedding_from(row, "embedding"),
            })
            .collect())
    }

    async fn rebuild_candidates(&self, kind: ItemKind, mode: RebuildMode) -> Result<Vec<String>> {
        let sql = match (kind, mode) {
            (ItemKind::Source, RebuildMode::Existing) => {
                r#"
                SELECT DISTINCT e.source_id FROM source_embeddings e
                JOIN sources s ON s.id = e.source_id
                WHERE length(e.embedding) > 0
                ORDER BY e.source_id
                "#
            }
            (ItemKind::Source, RebuildMode::All) => {
                "SELECT id FROM sources WHERE full_text IS NOT NULL AND full_text != '' ORDER BY id"
            }
            (ItemKind::Note, RebuildMode::Existing) => {
                "SELECT id FROM notes WHERE embedding IS NOT NULL AND length(embedding) > 0 ORDER BY id"
            }
            (ItemKind::Note, RebuildMode::All) => {
                "SELECT id FROM notes WHERE content IS NOT NULL AND content != '' ORDER BY id"
            }
            (ItemKind::Insight, RebuildMode::Existing) => {
                "SELECT id FROM source_insights WHERE embedding IS NOT NULL AND length(embedding) > 0 ORDER BY id"
            }
            (ItemKind::Insight, RebuildMode::All) => "SELECT id FROM source_insights ORDER BY id",
        };
        sqlx::query_scalar(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_messages_are_write_conflicts() {
        assert!(is_lock_message("database is locked"));
        assert!(is_lock_message("Database table is locked: notes"));
        assert!(!is_lock_message("no such table: notes"));
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert!(map_sqlx(sqlx::Error::PoolTimedOut).is_transient());
        assert!(map_sqlx(sqlx::Error::PoolClosed).is_transient());
        assert!(!map_sqlx(sqlx::Error::RowNotFound).is_transient());
    }
}

//! Persistent job ledger backed by the `command_jobs` table.
//!
//! Every submitted command gets one row. The worker pool moves it through
//! `queued → running → completed | failed` and bumps `attempts` on each try.

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use notebook_rag_core::jobs::{JobRecord, JobStatus};
use notebook_rag_core::models::{new_record_id, now_ts};
use notebook_rag_core::Result;

use crate::sqlite_store::map_sqlx;

pub const COMMAND_TABLE: &str = "command";

#[derive(Clone)]
pub struct JobLedger {
    pool: SqlitePool,
}

fn record_from_row(row: &SqliteRow) -> Result<JobRecord> {
    let payload: String = row.get("payload_json");
    let result: Option<String> = row.get("result_json");
    let status: String = row.get("status");
    Ok(JobRecord {
        id: row.get("id"),
        app: row.get("app"),
        command: row.get("command"),
        payload: serde_json::from_str(&payload)?,
        status: status.parse()?,
        result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        error: row.get("error"),
        attempts: row.get::<i64, _>("attempts") as u32,
        created: row.get("created"),
        updated: row.get("updated"),
    })
}

impl JobLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new queued job and return its id.
    pub async fn insert(&self, app: &str, command: &str, payload: &Value) -> Result<String> {
        let id = new_record_id(COMMAND_TABLE);
        let now = now_ts();
        sqlx::query(
            "INSERT INTO command_jobs (id, app, command, payload_json, status, attempts, created, updated)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(app)
        .bind(command)
        .bind(serde_json::to_string(payload)?)
        .bind(JobStatus::Queued.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM command_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Mark the job running and record that attempt `attempt` has started.
    pub async fn start_attempt(&self, id: &str, attempt: u32) -> Result<()> {
        sqlx::query("UPDATE command_jobs SET status = ?, attempts = ?, updated = ? WHERE id = ?")
            .bind(JobStatus::Running.as_str())
            .bind(attempt as i64)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    /// Close the job with a terminal status.
    pub async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let result_json = result.map(serde_json::to_string).transpose()?;
        sqlx::query(
            "UPDATE command_jobs SET status = ?, result_json = ?, error = ?, updated = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(result_json)
        .bind(error)
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    /// Jobs a previous process left queued or running, oldest first.
    pub async fn unfinished(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM command_jobs WHERE status IN ('queued', 'running') ORDER BY created, rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(record_from_row).collect()
    }

    /// Counts per status, for `nbrag status`.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM command_jobs GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.iter().map(|r| (r.get("status"), r.get("n"))).collect())
    }
}

//! Storage abstraction for the notebook pipeline.
//!
//! The [`Store`] trait covers every persistent operation the pipeline needs:
//! catalog reads and writes for notebooks, sources, notes and insights, the
//! delete-all-then-insert contract for chunk vectors, and candidate queries
//! for embedding rebuilds.
//!
//! Implementations must be `Send + Sync` and must classify contention
//! failures as [`PipelineError::WriteConflict`](crate::PipelineError::WriteConflict)
//! so chunk embedding jobs retry them.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkRecord, ItemKind, Note, Notebook, RebuildMode, Source, SourceInsight};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`delete_source_vectors`](Store::delete_source_vectors) | Drop every chunk vector of a source |
/// | [`insert_vector`](Store::insert_vector) | Append one chunk vector |
/// | [`count_source_vectors`](Store::count_source_vectors) | Embedded-chunk count |
/// | [`rebuild_candidates`](Store::rebuild_candidates) | Ids selected by a rebuild |
/// | [`update_insight_embedding`](Store::update_insight_embedding) | Replace an insight's vector |
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_notebook(&self, notebook: &Notebook) -> Result<()>;
    async fn get_notebook(&self, id: &str) -> Result<Option<Notebook>>;
    /// Sources linked to the notebook, most recently updated first.
    async fn notebook_sources(&self, notebook_id: &str) -> Result<Vec<Source>>;
    /// Notes linked to the notebook, most recently updated first.
    async fn notebook_notes(&self, notebook_id: &str) -> Result<Vec<Note>>;
    async fn add_source_to_notebook(&self, source_id: &str, notebook_id: &str) -> Result<()>;
    async fn add_note_to_notebook(&self, note_id: &str, notebook_id: &str) -> Result<()>;

    /// Insert or update a source.
    async fn save_source(&self, source: &Source) -> Result<()>;
    async fn get_source(&self, id: &str) -> Result<Option<Source>>;
    /// Delete a source together with its vectors, insights and notebook links.
    ///
    /// Returns `false` if there was no such source.
    async fn delete_source(&self, id: &str) -> Result<bool>;
    /// Link a source to the background job processing it.
    async fn set_source_command(&self, source_id: &str, job_id: &str) -> Result<()>;

    /// Insert or update an insight, including its embedding.
    async fn save_insight(&self, insight: &SourceInsight) -> Result<()>;
    async fn get_insight(&self, id: &str) -> Result<Option<SourceInsight>>;
    async fn source_insights(&self, source_id: &str) -> Result<Vec<SourceInsight>>;
    async fn update_insight_embedding(&self, id: &str, embedding: &[f32]) -> Result<()>;

    /// Insert or update a note, including its embedding.
    async fn save_note(&self, note: &Note) -> Result<()>;
    async fn get_note(&self, id: &str) -> Result<Option<Note>>;

    /// Delete every chunk vector of a source, returning how many were removed.
    async fn delete_source_vectors(&self, source_id: &str) -> Result<u64>;
    /// Append one chunk vector. No existence check is performed.
    async fn insert_vector(&self, record: &ChunkRecord) -> Result<()>;
    async fn count_source_vectors(&self, source_id: &str) -> Result<u64>;
    /// All chunk vectors of a source in `order`.
    async fn source_vectors(&self, source_id: &str) -> Result<Vec<ChunkRecord>>;

    /// Ids a rebuild would process for one category.
    ///
    /// - [`RebuildMode::Existing`]: sources with at least one non-empty chunk
    ///   vector; notes and insights whose own embedding is non-empty.
    /// - [`RebuildMode::All`]: sources with text, notes with content, and
    ///   every insight.
    async fn rebuild_candidates(&self, kind: ItemKind, mode: RebuildMode) -> Result<Vec<String>>;
}

//! In-memory [`Store`] implementation for testing.
//!
//! All tables live behind one `std::sync::RwLock`. A poisoned lock surfaces
//! as [`PipelineError::Storage`]. [`InMemoryStore::fail_next_inserts`]
//! makes the next N vector inserts fail with a write conflict, which is how
//! tests exercise the retry path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::models::{ChunkRecord, ItemKind, Note, Notebook, RebuildMode, Source, SourceInsight};

use super::Store;

#[derive(Default)]
struct Tables {
    notebooks: HashMap<String, Notebook>,
    sources: HashMap<String, Source>,
    notes: HashMap<String, Note>,
    insights: HashMap<String, SourceInsight>,
    /// (source_id, notebook_id)
    source_links: Vec<(String, String)>,
    /// (note_id, notebook_id)
    note_links: Vec<(String, String)>,
    vectors: Vec<ChunkRecord>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    failing_inserts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to [`Store::insert_vector`] fail with
    /// [`PipelineError::WriteConflict`].
    pub fn fail_next_inserts(&self, n: usize) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| PipelineError::Storage("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| PipelineError::Storage("in-memory store lock poisoned".into()))
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn newest_first<T>(mut items: Vec<T>, updated_at: impl Fn(&T) -> i64) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(updated_at(item)));
    items
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_notebook(&self, notebook: &Notebook) -> Result<()> {
        self.write()?
            .notebooks
            .insert(notebook.id.clone(), notebook.clone());
        Ok(())
    }

    async fn get_notebook(&self, id: &str) -> Result<Option<Notebook>> {
        Ok(self.read()?.notebooks.get(id).cloned())
    }

    async fn notebook_sources(&self, notebook_id: &str) -> Result<Vec<Source>> {
        let t = self.read()?;
        let sources = t
            .source_links
            .iter()
            .filter(|(_, nb)| nb == notebook_id)
            .filter_map(|(src, _)| t.sources.get(src).cloned())
            .collect();
        Ok(newest_first(sources, |s: &Source| s.updated_at))
    }

    async fn notebook_notes(&self, notebook_id: &str) -> Result<Vec<Note>> {
        let t = self.read()?;
        let notes = t
            .note_links
            .iter()
            .filter(|(_, nb)| nb == notebook_id)
            .filter_map(|(note, _)| t.notes.get(note).cloned())
            .collect();
        Ok(newest_first(notes, |n: &Note| n.updated_at))
    }

    async fn add_source_to_notebook(&self, source_id: &str, notebook_id: &str) -> Result<()> {
        let mut t = self.write()?;
        let link = (source_id.to_string(), notebook_id.to_string());
        if !t.source_links.contains(&link) {
            t.source_links.push(link);
        }
        Ok(())
    }

    async fn add_note_to_notebook(&self, note_id: &str, notebook_id: &str) -> Result<()> {
        let mut t = self.write()?;
        let link = (note_id.to_string(), notebook_id.to_string());
        if !t.note_links.contains(&link) {
            t.note_links.push(link);
        }
        Ok(())
    }

    async fn save_source(&self, source: &Source) -> Result<()> {
        self.write()?
            .sources
            .insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.read()?.sources.get(id).cloned())
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let mut t = self.write()?;
        if t.sources.remove(id).is_none() {
            return Ok(false);
        }
        t.vectors.retain(|v| v.source_id != id);
        t.insights.retain(|_, i| i.source_id != id);
        t.source_links.retain(|(src, _)| src != id);
        Ok(true)
    }

    async fn set_source_command(&self, source_id: &str, job_id: &str) -> Result<()> {
        let mut t = self.write()?;
        match t.sources.get_mut(source_id) {
            Some(source) => {
                source.command = Some(job_id.to_string());
                Ok(())
            }
            None => Err(PipelineError::not_found(format!("Source {}", source_id))),
        }
    }

    async fn save_insight(&self, insight: &SourceInsight) -> Result<()> {
        self.write()?
            .insights
            .insert(insight.id.clone(), insight.clone());
        Ok(())
    }

    async fn get_insight(&self, id: &str) -> Result<Option<SourceInsight>> {
        Ok(self.read()?.insights.get(id).cloned())
    }

    async fn source_insights(&self, source_id: &str) -> Result<Vec<SourceInsight>> {
        let t = self.read()?;
        let mut insights: Vec<SourceInsight> = t
            .insights
            .values()
            .filter(|i| i.source_id == source_id)
            .cloned()
            .collect();
        insights.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(insights)
    }

    async fn update_insight_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let mut t = self.write()?;
        match t.insights.get_mut(id) {
            Some(insight) => {
                insight.embedding = embedding.to_vec();
                Ok(())
            }
            None => Err(PipelineError::not_found(format!("Insight {}", id))),
        }
    }

    async fn save_note(&self, note: &Note) -> Result<()> {
        self.write()?.notes.insert(note.id.clone(), note.clone());
        Ok(())
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        Ok(self.read()?.notes.get(id).cloned())
    }

    async fn delete_source_vectors(&self, source_id: &str) -> Result<u64> {
        let mut t = self.write()?;
        let before = t.vectors.len();
        t.vectors.retain(|v| v.source_id != source_id);
        Ok((before - t.vectors.len()) as u64)
    }

    async fn insert_vector(&self, record: &ChunkRecord) -> Result<()> {
        if self.take_injected_failure() {
            return Err(PipelineError::WriteConflict(
                "injected transaction conflict".into(),
            ));
        }
        self.write()?.vectors.push(record.clone());
        Ok(())
    }

    async fn count_source_vectors(&self, source_id: &str) -> Result<u64> {
        let t = self.read()?;
        Ok(t.vectors.iter().filter(|v| v.source_id == source_id).count() as u64)
    }

    async fn source_vectors(&self, source_id: &str) -> Result<Vec<ChunkRecord>> {
        let t = self.read()?;
        let mut records: Vec<ChunkRecord> = t
            .vectors
            .iter()
            .filter(|v| v.source_id == source_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.order);
        Ok(records)
    }

    async fn rebuild_candidates(&self, kind: ItemKind, mode: RebuildMode) -> Result<Vec<String>> {
        let t = self.read()?;
        let mut ids: Vec<String> = match (kind, mode) {
            (ItemKind::Source, RebuildMode::Existing) => t
                .sources
                .keys()
                .filter(|id| {
                    t.vectors
                        .iter()
                        .any(|v| &v.source_id == *id && !v.embedding.is_empty())
                })
                .cloned()
                .collect(),
            (ItemKind::Source, RebuildMode::All) => t
                .sources
                .values()
                .filter(|s| s.text().is_some())
                .map(|s| s.id.clone())
                .collect(),
            (ItemKind::Note, RebuildMode::Existing) => t
                .notes
                .values()
                .filter(|n| !n.embedding.is_empty())
                .map(|n| n.id.clone())
                .collect(),
            (ItemKind::Note, RebuildMode::All) => t
                .notes
                .values()
                .filter(|n| n.content.as_deref().is_some_and(|c| !c.is_empty()))
                .map(|n| n.id.clone())
                .collect(),
            (ItemKind::Insight, RebuildMode::Existing) => t
                .insights
                .values()
                .filter(|i| !i.embedding.is_empty())
                .map(|i| i.id.clone())
                .collect(),
            (ItemKind::Insight, RebuildMode::All) => t.insights.keys().cloned().collect(),
        };
        ids.sort();
        Ok(ids)
    }
}

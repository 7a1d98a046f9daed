//! Token-bounded context assembly for language-model calls.
//!
//! A [`ContextBuilder`] runs a single pass:
//!
//! ```text
//! collect ──▶ remove_duplicates ──▶ prioritize ──▶ truncate_to_fit ──▶ format
//! ```
//!
//! - **collect**: a source (plus its insights), a notebook (per-item inclusion
//!   map or a default sweep of every source and note), or an explicit list.
//!   Ids that do not resolve are logged and skipped; a missing notebook is
//!   [`PipelineError::NotFound`].
//! - **remove_duplicates**: first occurrence of an id wins.
//! - **prioritize**: stable sort by weight, highest first
//!   (source 100, insight 75, note 50 by default).
//! - **truncate_to_fit**: pop from the end until the summed token cost fits.
//!   Items are never split and the top item is never dropped, so a single
//!   oversized item can exceed the limit.
//!
//! Token cost is counted on the JSON payload actually sent downstream, once,
//! on first use.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{PipelineError, Result};
use crate::models::{ensure_record_id, ItemKind, Note, Source, NOTEBOOK_TABLE, NOTE_TABLE, SOURCE_TABLE};
use crate::store::Store;
use crate::tokens::token_count;

/// Characters of note content kept at short detail.
pub const NOTE_PREVIEW_CHARS: usize = 100;

/// How much of an item goes into the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InclusionLevel {
    #[serde(rename = "not in")]
    NotIn,
    /// Short detail; for sources, also their insights.
    #[serde(rename = "insights")]
    Insights,
    /// Long detail (source full text, complete note content).
    #[serde(rename = "full content")]
    FullContent,
}

impl InclusionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotIn => "not in",
            Self::Insights => "insights",
            Self::FullContent => "full content",
        }
    }
}

impl std::str::FromStr for InclusionLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "not in" => Ok(Self::NotIn),
            "insights" => Ok(Self::Insights),
            "full content" => Ok(Self::FullContent),
            other => Err(PipelineError::invalid(format!(
                "Invalid inclusion level: {}. Must be 'not in', 'insights' or 'full content'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub source: i64,
    pub insight: i64,
    pub note: i64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            source: 100,
            insight: 75,
            note: 50,
        }
    }
}

impl PriorityWeights {
    pub fn weight(&self, kind: ItemKind) -> i64 {
        match kind {
            ItemKind::Source => self.source,
            ItemKind::Insight => self.insight,
            ItemKind::Note => self.note,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Per-source inclusion. Empty means "every source of the notebook".
    pub sources: BTreeMap<String, InclusionLevel>,
    /// Per-note inclusion. Empty means "every note of the notebook".
    pub notes: BTreeMap<String, InclusionLevel>,
    pub include_insights: bool,
    pub include_notes: bool,
    pub max_tokens: Option<usize>,
    /// Overrides the builder's weights when set.
    pub priority_weights: Option<PriorityWeights>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sources: BTreeMap::new(),
            notes: BTreeMap::new(),
            include_insights: true,
            include_notes: true,
            max_tokens: None,
            priority_weights: None,
        }
    }
}

/// One typed, weighted unit of context.
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub id: String,
    pub kind: ItemKind,
    pub content: Value,
    pub priority: i64,
    tokens: OnceLock<usize>,
}

impl ContextItem {
    pub fn new(id: impl Into<String>, kind: ItemKind, content: Value, priority: i64) -> Self {
        Self {
            id: id.into(),
            kind,
            content,
            priority,
            tokens: OnceLock::new(),
        }
    }

    /// An item whose token cost is already known.
    pub fn with_token_count(
        id: impl Into<String>,
        kind: ItemKind,
        content: Value,
        priority: i64,
        tokens: usize,
    ) -> Self {
        let item = Self::new(id, kind, content, priority);
        let _ = item.tokens.set(tokens);
        item
    }

    pub fn token_count(&self) -> usize {
        *self
            .tokens
            .get_or_init(|| token_count(&self.content.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfigSummary {
    pub include_insights: bool,
    pub include_notes: bool,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub source_count: usize,
    pub note_count: usize,
    pub insight_count: usize,
    pub config: ContextConfigSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResponse {
    pub sources: Vec<Value>,
    pub notes: Vec<Value>,
    pub insights: Vec<Value>,
    pub total_tokens: usize,
    pub total_items: usize,
    pub metadata: ContextMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<String>,
}

/// Assembles a [`ContextResponse`] from a store.
pub struct ContextBuilder<'a> {
    store: &'a dyn Store,
    source_id: Option<String>,
    notebook_id: Option<String>,
    config: ContextConfig,
    weights: PriorityWeights,
    items: Vec<ContextItem>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            source_id: None,
            notebook_id: None,
            config: ContextConfig::default(),
            weights: PriorityWeights::default(),
            items: Vec::new(),
        }
    }

    pub fn source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn notebook(mut self, notebook_id: impl Into<String>) -> Self {
        self.notebook_id = Some(notebook_id.into());
        self
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Weights used unless the config carries its own.
    pub fn priority_weights(mut self, weights: PriorityWeights) -> Self {
        self.weights = weights;
        self
    }

    fn weights(&self) -> PriorityWeights {
        self.config.priority_weights.unwrap_or(self.weights)
    }

    pub fn include_insights(mut self, include: bool) -> Self {
        self.config.include_insights = include;
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        if max_tokens.is_some() {
            self.config.max_tokens = max_tokens;
        }
        self
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub async fn build(mut self) -> Result<ContextResponse> {
        self.items.clear();

        if let Some(source_id) = self.source_id.clone() {
            self.add_source(&source_id, InclusionLevel::Insights).await?;
        }
        if let Some(notebook_id) = self.notebook_id.clone() {
            self.add_notebook(&notebook_id).await?;
        } else {
            self.add_configured().await?;
        }

        self.remove_duplicates();
        self.prioritize();
        if let Some(max) = self.config.max_tokens.filter(|m| *m > 0) {
            self.truncate_to_fit(max);
        }
        Ok(self.format())
    }

    pub fn add_item(&mut self, item: ContextItem) {
        tracing::debug!(id = %item.id, priority = item.priority, "added context item");
        self.items.push(item);
    }

    pub fn remove_duplicates(&mut self) {
        let before = self.items.len();
        let mut seen = HashSet::new();
        self.items.retain(|item| seen.insert(item.id.clone()));
        let removed = before - self.items.len();
        if removed > 0 {
            tracing::debug!(removed, "removed duplicate context items");
        }
    }

    /// Highest priority first; ties keep insertion order.
    pub fn prioritize(&mut self) {
        self.items.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Drop lowest-priority items until the total fits `max_tokens` or only
    /// the top item is left.
    pub fn truncate_to_fit(&mut self, max_tokens: usize) {
        let mut total: usize = self.items.iter().map(ContextItem::token_count).sum();
        if total <= max_tokens {
            return;
        }
        tracing::info!(total, max_tokens, "truncating context");
        let mut removed = 0;
        while total > max_tokens && self.items.len() > 1 {
            if let Some(item) = self.items.pop() {
                total -= item.token_count();
                removed += 1;
            }
        }
        tracing::info!(removed, total, "context truncated");
    }

    pub fn format(&self) -> ContextResponse {
        let mut sources = Vec::new();
        let mut notes = Vec::new();
        let mut insights = Vec::new();
        for item in &self.items {
            match item.kind {
                ItemKind::Source => sources.push(item.content.clone()),
                ItemKind::Note => notes.push(item.content.clone()),
                ItemKind::Insight => insights.push(item.content.clone()),
            }
        }
        let total_tokens = self.items.iter().map(ContextItem::token_count).sum();
        tracing::info!(items = self.items.len(), total_tokens, "built context");

        ContextResponse {
            metadata: ContextMetadata {
                source_count: sources.len(),
                note_count: notes.len(),
                insight_count: insights.len(),
                config: ContextConfigSummary {
                    include_insights: self.config.include_insights,
                    include_notes: self.config.include_notes,
                    max_tokens: self.config.max_tokens,
                },
            },
            sources,
            notes,
            insights,
            total_tokens,
            total_items: self.items.len(),
            notebook_id: self.notebook_id.clone(),
        }
    }

    async fn add_notebook(&mut self, notebook_id: &str) -> Result<()> {
        let id = ensure_record_id(NOTEBOOK_TABLE, notebook_id);
        if self.store.get_notebook(&id).await?.is_none() {
            return Err(PipelineError::not_found(format!("Notebook {}", notebook_id)));
        }

        if self.config.sources.is_empty() {
            for source in self.store.notebook_sources(&id).await? {
                self.push_source(&source, InclusionLevel::Insights).await?;
            }
        } else {
            self.add_configured_sources().await?;
        }

        if self.config.include_notes {
            if self.config.notes.is_empty() {
                for note in self.store.notebook_notes(&id).await? {
                    self.push_note(&note, InclusionLevel::Insights);
                }
            } else {
                self.add_configured_notes().await?;
            }
        }
        tracing::debug!(notebook_id = %id, "added notebook context");
        Ok(())
    }

    async fn add_configured(&mut self) -> Result<()> {
        self.add_configured_sources().await?;
        if self.config.include_notes {
            self.add_configured_notes().await?;
        }
        Ok(())
    }

    async fn add_configured_sources(&mut self) -> Result<()> {
        let wanted: Vec<(String, InclusionLevel)> = self
            .config
            .sources
            .iter()
            .map(|(id, level)| (id.clone(), *level))
            .collect();
        for (id, level) in wanted {
            self.add_source(&id, level).await?;
        }
        Ok(())
    }

    async fn add_configured_notes(&mut self) -> Result<()> {
        let wanted: Vec<(String, InclusionLevel)> = self
            .config
            .notes
            .iter()
            .map(|(id, level)| (id.clone(), *level))
            .collect();
        for (id, level) in wanted {
            self.add_note(&id, level).await?;
        }
        Ok(())
    }

    async fn add_source(&mut self, source_id: &str, level: InclusionLevel) -> Result<()> {
        if level == InclusionLevel::NotIn {
            return Ok(());
        }
        let id = ensure_record_id(SOURCE_TABLE, source_id);
        match self.store.get_source(&id).await? {
            Some(source) => self.push_source(&source, level).await,
            None => {
                tracing::warn!(source_id = %id, "source not found, skipping");
                Ok(())
            }
        }
    }

    async fn push_source(&mut self, source: &Source, level: InclusionLevel) -> Result<()> {
        let insights = self.store.source_insights(&source.id).await?;
        let insight_summaries: Vec<Value> = insights
            .iter()
            .map(|i| json!({ "id": i.id, "insight_type": i.insight_type, "content": i.content }))
            .collect();

        let mut content = json!({
            "id": source.id,
            "title": source.title,
            "insights": insight_summaries,
        });
        if level == InclusionLevel::FullContent {
            content["full_text"] = json!(source.full_text);
        }
        let weights = self.weights();
        self.add_item(ContextItem::new(
            source.id.clone(),
            ItemKind::Source,
            content,
            weights.source,
        ));

        if self.config.include_insights && level == InclusionLevel::Insights {
            for insight in insights {
                let content = json!({
                    "id": insight.id,
                    "source_id": source.id,
                    "insight_type": insight.insight_type,
                    "content": insight.content,
                });
                self.add_item(ContextItem::new(
                    insight.id,
                    ItemKind::Insight,
                    content,
                    weights.insight,
                ));
            }
        }
        Ok(())
    }

    async fn add_note(&mut self, note_id: &str, level: InclusionLevel) -> Result<()> {
        if level == InclusionLevel::NotIn {
            return Ok(());
        }
        let id = ensure_record_id(NOTE_TABLE, note_id);
        match self.store.get_note(&id).await? {
            Some(note) => self.push_note(&note, level),
            None => tracing::warn!(note_id = %id, "note not found, skipping"),
        }
        Ok(())
    }

    fn push_note(&mut self, note: &Note, level: InclusionLevel) {
        let content = match level {
            InclusionLevel::FullContent => note.content.clone(),
            _ => note
                .content
                .as_deref()
                .map(|c| c.chars().take(NOTE_PREVIEW_CHARS).collect::<String>()),
        };
        let payload = json!({ "id": note.id, "title": note.title, "content": content });
        let weight = self.weights().note;
        self.add_item(ContextItem::new(note.id.clone(), ItemKind::Note, payload, weight));
    }
}

/// Context for a notebook, by inclusion map or default sweep.
pub async fn build_notebook_context(
    store: &dyn Store,
    notebook_id: &str,
    config: Option<ContextConfig>,
    max_tokens: Option<usize>,
    weights: PriorityWeights,
) -> Result<ContextResponse> {
    ContextBuilder::new(store)
        .notebook(notebook_id)
        .config(config.unwrap_or_default())
        .priority_weights(weights)
        .max_tokens(max_tokens)
        .build()
        .await
}

/// Context for one source and, optionally, its insights.
pub async fn build_source_context(
    store: &dyn Store,
    source_id: &str,
    include_insights: bool,
    max_tokens: Option<usize>,
    weights: PriorityWeights,
) -> Result<ContextResponse> {
    ContextBuilder::new(store)
        .source(source_id)
        .priority_weights(weights)
        .include_insights(include_insights)
        .max_tokens(max_tokens)
        .build()
        .await
}

/// Context for explicit sources (with insights) and notes (full content),
/// scoped to a notebook when one is given.
pub async fn build_mixed_context(
    store: &dyn Store,
    source_ids: &[String],
    note_ids: &[String],
    notebook_id: Option<&str>,
    max_tokens: Option<usize>,
    weights: PriorityWeights,
) -> Result<ContextResponse> {
    let config = ContextConfig {
        sources: source_ids
            .iter()
            .map(|id| (id.clone(), InclusionLevel::Insights))
            .collect(),
        notes: note_ids
            .iter()
            .map(|id| (id.clone(), InclusionLevel::FullContent))
            .collect(),
        max_tokens,
        ..ContextConfig::default()
    };
    let mut builder = ContextBuilder::new(store)
        .config(config)
        .priority_weights(weights);
    if let Some(nb) = notebook_id {
        builder = builder.notebook(nb);
    }
    builder.build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Notebook, SourceInsight};
    use crate::store::memory::InMemoryStore;

    fn item(id: &str, kind: ItemKind, priority: i64, tokens: usize) -> ContextItem {
        ContextItem::with_token_count(id, kind, json!({ "id": id }), priority, tokens)
    }

    #[test]
    fn truncation_drops_lowest_priority_first() {
        let store = InMemoryStore::new();
        let mut builder = ContextBuilder::new(&store);
        builder.add_item(item("note:c", ItemKind::Note, 50, 50));
        builder.add_item(item("source:a", ItemKind::Source, 100, 100));
        builder.add_item(item("source_insight:b", ItemKind::Insight, 75, 80));
        builder.prioritize();
        builder.truncate_to_fit(150);

        let ids: Vec<&str> = builder.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["source:a"]);
    }

    #[test]
    fn oversized_top_item_is_kept() {
        let store = InMemoryStore::new();
        let mut builder = ContextBuilder::new(&store);
        builder.add_item(item("source:a", ItemKind::Source, 100, 500));
        builder.add_item(item("note:b", ItemKind::Note, 50, 20));
        builder.truncate_to_fit(100);

        let ids: Vec<&str> = builder.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["source:a"]);
        assert_eq!(builder.format().total_tokens, 500);
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let store = InMemoryStore::new();
        let mut builder = ContextBuilder::new(&store);
        builder.add_item(item("source:a", ItemKind::Source, 100, 10));
        builder.add_item(item("note:b", ItemKind::Note, 50, 10));
        builder.add_item(item("source:a", ItemKind::Source, 1, 99));
        builder.remove_duplicates();

        assert_eq!(builder.items().len(), 2);
        assert_eq!(builder.items()[0].priority, 100);
    }

    #[test]
    fn prioritize_is_stable_for_ties() {
        let store = InMemoryStore::new();
        let mut builder = ContextBuilder::new(&store);
        builder.add_item(item("note:1", ItemKind::Note, 50, 1));
        builder.add_item(item("source:1", ItemKind::Source, 100, 1));
        builder.add_item(item("note:2", ItemKind::Note, 50, 1));
        builder.prioritize();
        let ids: Vec<&str> = builder.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["source:1", "note:1", "note:2"]);
    }

    #[test]
    fn token_cost_is_computed_from_payload() {
        let a = ContextItem::new("x", ItemKind::Note, json!({ "content": "short" }), 50);
        let b = ContextItem::new(
            "y",
            ItemKind::Note,
            json!({ "content": "a much longer note body with several more words in it" }),
            50,
        );
        assert!(a.token_count() > 0);
        assert!(b.token_count() > a.token_count());
    }

    #[test]
    fn inclusion_levels_use_spaced_names() {
        let level: InclusionLevel = serde_json::from_str("\"full content\"").unwrap();
        assert_eq!(level, InclusionLevel::FullContent);
        assert_eq!("not in".parse::<InclusionLevel>().unwrap(), InclusionLevel::NotIn);
        assert!("everything".parse::<InclusionLevel>().is_err());
    }

    async fn notebook_with_two_sources_and_a_note(store: &InMemoryStore) -> Notebook {
        let notebook = Notebook::new("research", "").unwrap();
        store.save_notebook(&notebook).await.unwrap();
        for title in ["first", "second"] {
            let source = Source::new(Some(title.into()), Some(format!("{} body text", title)));
            store.save_source(&source).await.unwrap();
            store.add_source_to_notebook(&source.id, &notebook.id).await.unwrap();
        }
        let note = Note::new(Some("n".into()), Some("x".repeat(250)), None);
        store.save_note(&note).await.unwrap();
        store.add_note_to_notebook(&note.id, &notebook.id).await.unwrap();
        notebook
    }

    #[tokio::test]
    async fn default_notebook_context_uses_short_detail() {
        let store = InMemoryStore::new();
        let notebook = notebook_with_two_sources_and_a_note(&store).await;

        let ctx = build_notebook_context(&store, &notebook.id, None, None, PriorityWeights::default())
            .await
            .unwrap();
        assert_eq!(ctx.sources.len(), 2);
        assert_eq!(ctx.notes.len(), 1);
        assert!(ctx.insights.is_empty());
        assert!(ctx.sources.iter().all(|s| s.get("full_text").is_none()));
        assert_eq!(ctx.notes[0]["content"].as_str().unwrap().len(), NOTE_PREVIEW_CHARS);
        assert_eq!(ctx.total_items, 3);
        assert_eq!(ctx.notebook_id.as_deref(), Some(notebook.id.as_str()));
    }

    #[tokio::test]
    async fn source_reached_twice_appears_once() {
        let store = InMemoryStore::new();
        let notebook = notebook_with_two_sources_and_a_note(&store).await;
        let first = store.notebook_sources(&notebook.id).await.unwrap()[0].clone();

        let ctx = ContextBuilder::new(&store)
            .source(first.id.clone())
            .notebook(notebook.id.clone())
            .build()
            .await
            .unwrap();
        let hits = ctx.sources.iter().filter(|s| s["id"] == json!(first.id)).count();
        assert_eq!(hits, 1);
        assert_eq!(ctx.sources.len(), 2);
    }

    #[tokio::test]
    async fn source_context_carries_insights() {
        let store = InMemoryStore::new();
        let source = Source::new(Some("doc".into()), Some("body".into()));
        store.save_source(&source).await.unwrap();
        let insight = SourceInsight::new(&source.id, "summary", "it is short").unwrap();
        store.save_insight(&insight).await.unwrap();

        let ctx = build_source_context(&store, &source.id, true, None, PriorityWeights::default())
            .await
            .unwrap();
        assert_eq!(ctx.sources.len(), 1);
        assert_eq!(ctx.insights.len(), 1);
        assert_eq!(ctx.insights[0]["insight_type"], "summary");
        assert_eq!(ctx.insights[0]["source_id"], json!(source.id));

        let ctx = build_source_context(&store, &source.id, false, None, PriorityWeights::default())
            .await
            .unwrap();
        assert!(ctx.insights.is_empty());
        assert!(ctx.notebook_id.is_none());
    }

    #[tokio::test]
    async fn configured_weights_decide_what_survives_truncation() {
        let store = InMemoryStore::new();
        let source = Source::new(Some("doc".into()), Some("body".into()));
        store.save_source(&source).await.unwrap();
        let insight = SourceInsight::new(&source.id, "summary", "it is short").unwrap();
        store.save_insight(&insight).await.unwrap();

        let ctx = build_source_context(&store, &source.id, true, Some(1), PriorityWeights::default())
            .await
            .unwrap();
        assert_eq!(ctx.sources.len(), 1);
        assert!(ctx.insights.is_empty());

        let insights_first = PriorityWeights {
            insight: 200,
            ..PriorityWeights::default()
        };
        let ctx = build_source_context(&store, &source.id, true, Some(1), insights_first)
            .await
            .unwrap();
        assert!(ctx.sources.is_empty());
        assert_eq!(ctx.insights.len(), 1);
    }

    #[tokio::test]
    async fn config_weights_override_builder_weights() {
        let store = InMemoryStore::new();
        let notebook = notebook_with_two_sources_and_a_note(&store).await;
        let notes_first = PriorityWeights {
            note: 500,
            ..PriorityWeights::default()
        };

        let ctx = build_notebook_context(&store, &notebook.id, None, Some(1), notes_first)
            .await
            .unwrap();
        assert_eq!(ctx.notes.len(), 1);
        assert!(ctx.sources.is_empty());

        let config = ContextConfig {
            priority_weights: Some(PriorityWeights::default()),
            ..ContextConfig::default()
        };
        let ctx = build_notebook_context(&store, &notebook.id, Some(config), Some(1), notes_first)
            .await
            .unwrap();
        assert!(ctx.notes.is_empty());
        assert_eq!(ctx.sources.len(), 1);
    }

    #[tokio::test]
    async fn inclusion_map_controls_detail() {
        let store = InMemoryStore::new();
        let notebook = notebook_with_two_sources_and_a_note(&store).await;
        let sources = store.notebook_sources(&notebook.id).await.unwrap();

        let mut config = ContextConfig::default();
        config.sources.insert(sources[0].id.clone(), InclusionLevel::FullContent);
        config.sources.insert(sources[1].id.clone(), InclusionLevel::NotIn);
        config.sources.insert("source:missing".into(), InclusionLevel::Insights);
        config.include_notes = false;

        let ctx = build_notebook_context(
            &store,
            &notebook.id,
            Some(config),
            None,
            PriorityWeights::default(),
        )
        .await
            .unwrap();
        assert_eq!(ctx.sources.len(), 1);
        assert!(ctx.sources[0].get("full_text").is_some());
        assert!(ctx.notes.is_empty());
    }

    #[tokio::test]
    async fn mixed_context_without_notebook() {
        let store = InMemoryStore::new();
        let source = Source::new(Some("doc".into()), Some("body".into()));
        store.save_source(&source).await.unwrap();
        let note = Note::new(None, Some("y".repeat(150)), None);
        store.save_note(&note).await.unwrap();

        let ctx = build_mixed_context(
            &store,
            &[source.id.clone()],
            &[note.id.clone()],
            None,
            None,
            PriorityWeights::default(),
        )
        .await
        .unwrap();
        assert_eq!(ctx.sources.len(), 1);
        assert_eq!(ctx.notes[0]["content"].as_str().unwrap().len(), 150);
    }

    #[tokio::test]
    async fn missing_notebook_is_not_found() {
        let store = InMemoryStore::new();
        let err = build_notebook_context(&store, "nope", None, None, PriorityWeights::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}

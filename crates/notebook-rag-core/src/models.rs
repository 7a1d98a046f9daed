//! Core data models for notebooks, sources, notes, insights and chunk vectors.
//!
//! Record ids are table-prefixed strings (`source:…`, `note:…`). Use
//! [`ensure_record_id`] to accept either a bare or a prefixed id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

pub const NOTEBOOK_TABLE: &str = "notebook";
pub const SOURCE_TABLE: &str = "source";
pub const NOTE_TABLE: &str = "note";
pub const INSIGHT_TABLE: &str = "source_insight";

/// Generate a fresh record id for `table`.
pub fn new_record_id(table: &str) -> String {
    format!("{}:{}", table, Uuid::new_v4().simple())
}

/// Prefix `id` with `table:` unless it already carries that prefix.
pub fn ensure_record_id(table: &str, id: &str) -> String {
    let prefix = format!("{}:", table);
    if id.starts_with(&prefix) {
        id.to_string()
    } else {
        format!("{}{}", prefix, id)
    }
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The three embeddable entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Source,
    Note,
    Insight,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Note => "note",
            Self::Insight => "insight",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Source => SOURCE_TABLE,
            Self::Note => NOTE_TABLE,
            Self::Insight => INSIGHT_TABLE,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" => Ok(Self::Source),
            "note" => Ok(Self::Note),
            "insight" => Ok(Self::Insight),
            other => Err(PipelineError::invalid(format!(
                "Invalid item_type: {}. Must be 'source', 'note', or 'insight'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Notebook {
    pub fn new(name: &str, description: &str) -> Result<Self, PipelineError> {
        if name.trim().is_empty() {
            return Err(PipelineError::invalid("Notebook name cannot be empty"));
        }
        let now = now_ts();
        Ok(Self {
            id: new_record_id(NOTEBOOK_TABLE),
            name: name.to_string(),
            description: description.to_string(),
            archived: false,
            created_at: now,
            updated_at: now,
        })
    }
}

/// An on-disk file or remote URL a source was ingested from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub file_path: Option<String>,
    pub url: Option<String>,
}

/// An ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub full_text: Option<String>,
    pub asset: Option<Asset>,
    /// Id of the background job currently processing this source.
    pub command: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Source {
    pub fn new(title: Option<String>, full_text: Option<String>) -> Self {
        let now = now_ts();
        Self {
            id: new_record_id(SOURCE_TABLE),
            title,
            topics: Vec::new(),
            full_text,
            asset: None,
            command: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The text to vectorize, if there is any.
    pub fn text(&self) -> Option<&str> {
        self.full_text.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: Option<String>,
    pub note_type: Option<NoteType>,
    pub content: Option<String>,
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Note {
    pub fn new(title: Option<String>, content: Option<String>, note_type: Option<NoteType>) -> Self {
        let now = now_ts();
        Self {
            id: new_record_id(NOTE_TABLE),
            title,
            note_type,
            content,
            embedding: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        match &self.content {
            Some(c) if c.trim().is_empty() => {
                Err(PipelineError::invalid("Note content cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// A typed annotation (e.g. "summary") attached to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInsight {
    pub id: String,
    pub source_id: String,
    pub insight_type: String,
    pub content: String,
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SourceInsight {
    pub fn new(source_id: &str, insight_type: &str, content: &str) -> Result<Self, PipelineError> {
        if insight_type.trim().is_empty() || content.trim().is_empty() {
            return Err(PipelineError::invalid(
                "Insight type and content must be provided",
            ));
        }
        let now = now_ts();
        Ok(Self {
            id: new_record_id(INSIGHT_TABLE),
            source_id: source_id.to_string(),
            insight_type: insight_type.to_string(),
            content: content.to_string(),
            embedding: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }
}

/// One embedded slice of a source's text.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub source_id: String,
    /// Zero-based position of the chunk in split order.
    pub order: i64,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Which items a rebuild sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    /// Only items that already carry a non-empty embedding.
    Existing,
    /// Every item with embeddable content.
    All,
}

impl RebuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Existing => "existing",
            Self::All => "all",
        }
    }
}

impl std::fmt::Display for RebuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RebuildMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "existing" => Ok(Self::Existing),
            "all" => Ok(Self::All),
            other => Err(PipelineError::invalid(format!(
                "Invalid mode: {}. Must be 'existing' or 'all'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_record_id_adds_missing_prefix_only() {
        assert_eq!(ensure_record_id("source", "abc"), "source:abc");
        assert_eq!(ensure_record_id("source", "source:abc"), "source:abc");
        assert_eq!(ensure_record_id("note", "source:abc"), "note:source:abc");
    }

    #[test]
    fn item_kind_parses_case_insensitively() {
        assert_eq!("Insight".parse::<ItemKind>().unwrap(), ItemKind::Insight);
        assert!("chunk".parse::<ItemKind>().is_err());
    }

    #[test]
    fn rebuild_mode_rejects_unknown_values() {
        assert_eq!("ALL".parse::<RebuildMode>().unwrap(), RebuildMode::All);
        let err = "some".parse::<RebuildMode>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn blank_note_content_is_rejected() {
        let note = Note::new(None, Some("   ".into()), None);
        assert!(note.validate().is_err());
        let note = Note::new(None, None, Some(NoteType::Human));
        assert!(note.validate().is_ok());
    }

    #[test]
    fn source_without_text_has_nothing_to_vectorize() {
        assert!(Source::new(None, None).text().is_none());
        assert!(Source::new(None, Some(String::new())).text().is_none());
        assert_eq!(Source::new(None, Some("x".into())).text(), Some("x"));
    }
}

//! Pipeline commands.
//!
//! | Command | Retries | Purpose |
//! |---------|---------|---------|
//! | [`embed_chunk`](embed_chunk::EmbedChunk) | policy (transient kinds) | Embed one chunk, insert one vector row |
//! | [`vectorize_source`](vectorize::VectorizeSource) | none | Replace a source's vectors, fan out chunk jobs |
//! | [`rebuild_embeddings`](rebuild::RebuildEmbeddings) | none | Re-embed a selection of sources, notes, insights |
//! | [`embed_single_item`](embed_item::EmbedSingleItem) | none | Re-embed one item synchronously |
//!
//! Every command body catches its own non-transient failures and reports
//! them as an output with `success: false` and an `error_message`.

pub mod embed_chunk;
pub mod embed_item;
pub mod rebuild;
pub mod vectorize;

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::jobs::Command;
use crate::settings::PipelineSettings;

pub use embed_chunk::{embed_chunk, EmbedChunk, EmbedChunkInput, EmbedChunkOutput};
pub use embed_item::{
    embed_single_item, reembed_insight, save_note, EmbedSingleItem, EmbedSingleItemInput,
    EmbedSingleItemOutput,
};
pub use rebuild::{
    collect_items, estimate_rebuild, rebuild_embeddings, RebuildEmbeddings, RebuildEmbeddingsInput,
    RebuildEmbeddingsOutput, RebuildItems,
};
pub use vectorize::{
    embedded_chunks, submit_vectorization, vectorize_source, VectorizeSource, VectorizeSourceInput,
    VectorizeSourceOutput,
};

pub const EMBED_CHUNK: &str = "embed_chunk";
pub const VECTORIZE_SOURCE: &str = "vectorize_source";
pub const REBUILD_EMBEDDINGS: &str = "rebuild_embeddings";
pub const EMBED_SINGLE_ITEM: &str = "embed_single_item";

/// All pipeline commands, ready to register with a job queue.
pub fn builtin(settings: &PipelineSettings) -> Vec<Arc<dyn Command>> {
    vec![
        Arc::new(EmbedChunk::new(settings.embed_chunk_retry.clone())),
        Arc::new(VectorizeSource),
        Arc::new(RebuildEmbeddings),
        Arc::new(EmbedSingleItem),
    ]
}

fn parse_input<T: DeserializeOwned>(command: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| PipelineError::invalid(format!("bad {} payload: {}", command, e)))
}

fn to_output<T: Serialize>(output: &T) -> Result<Value> {
    Ok(serde_json::to_value(output)?)
}

fn elapsed_secs(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

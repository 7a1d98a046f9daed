//! Per-operation pipeline settings.
//!
//! The application builds one [`PipelineSettings`] from its configuration and
//! hands it to every command through
//! [`CommandContext`](crate::jobs::CommandContext). Nothing in the core reads
//! configuration from global state.

use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::context::PriorityWeights;
use crate::jobs::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    pub embed_chunk_retry: RetryPolicy,
    /// Log a dispatch progress line every this many chunks.
    pub dispatch_log_every: usize,
    /// Log a rebuild progress line every this many items.
    pub rebuild_log_every: usize,
    pub priority_weights: PriorityWeights,
    /// Token ceiling applied when a context request does not give one.
    pub default_max_tokens: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            embed_chunk_retry: RetryPolicy::embed_chunk_default(),
            dispatch_log_every: 100,
            rebuild_log_every: 10,
            priority_weights: PriorityWeights::default(),
            default_max_tokens: None,
        }
    }
}

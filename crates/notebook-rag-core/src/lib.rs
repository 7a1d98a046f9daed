//! # Notebook RAG Core
//!
//! Runtime-agnostic logic for the notebook retrieval pipeline: data models,
//! token-aware chunking, the store abstraction, the embedding provider trait,
//! the background-job contracts, and context assembly.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Every side effect
//! goes through one of three traits supplied by the application:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`store::Store`] | Sources, notes, insights, notebooks and chunk vectors |
//! | [`embedding::EmbeddingProvider`] | Text → vector |
//! | [`jobs::JobQueue`] | Submit and poll background commands |
//!
//! ## Pipeline
//!
//! ```text
//! source ──▶ vectorize_source ──▶ split_text ──▶ embed_chunk × N ──▶ source_embeddings
//!                                                 (one job per chunk)
//!
//! notebook / source ──▶ ContextBuilder ──▶ dedup ─▶ prioritize ─▶ truncate ─▶ payload
//! ```

pub mod chunk;
pub mod commands;
pub mod context;
pub mod embedding;
pub mod error;
pub mod jobs;
pub mod models;
pub mod settings;
pub mod store;
pub mod tokens;

pub use error::{ErrorKind, PipelineError, Result};
pub use settings::PipelineSettings;

//! # notebook-rag
//!
//! Retrieval pipeline for research notebooks. Sources are split into
//! token-bounded chunks and embedded by independently retried background
//! jobs; notes and insights are embedded on save; a context builder turns a
//! notebook into a prioritized, token-bounded payload for a language model.
//!
//! The pipeline itself (models, chunking, commands, context assembly) lives
//! in the `notebook-rag-core` crate. This crate supplies the concrete
//! pieces around it.
//!
//! ```text
//! ┌──────────┐   submit    ┌───────────────┐  execute   ┌───────────────┐
//! │ CLI/HTTP │────────────▶│ LocalJobQueue │───────────▶│ core commands │
//! └────┬─────┘             │ ledger+workers│            └───────┬───────┘
//!      │ context           └───────────────┘                    │
//!      ▼                                                        ▼
//! ┌──────────────┐                                      ┌───────────────┐
//! │ContextBuilder│─────────────── reads ───────────────▶│  SqliteStore  │
//! └──────────────┘                                      └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite pool |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | `Store` over SQLite |
//! | [`embedding`] | OpenAI and Ollama providers |
//! | [`ledger`] | Persisted job records |
//! | [`queue`] | Worker pool with retry execution |
//! | [`pipeline`] | Wiring of the above |
//! | [`catalog`] | Notebooks, sources, notes, insights; status views |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing subscriber |

pub mod catalog;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ledger;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod sqlite_store;

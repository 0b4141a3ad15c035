//! # Hybrid Context
//!
//! Document retrieval that fuses dense vector search with per-owner BM25,
//! and improves both by prefixing every chunk with a short generated
//! description of where it sits in its document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Extract  │──▶│  Chunk   │──▶│  Enrich  │──▶│  Embed   │──▶│  SQLite  │
//! │ PDF/text │   │ adaptive │   │ Anthropic│   │ provider │   │  store   │
//! └──────────┘   └──────────┘   └──────────┘   └──────────┘   └────┬─────┘
//!                                                                  │
//!                     ┌──────────────────────┬─────────────────────┤
//!                     ▼                      ▼                     │
//!               ┌──────────┐           ┌──────────┐                │
//!               │ semantic │           │   BM25   │◀── rebuilt ────┘
//!               └────┬─────┘           └────┬─────┘    on write
//!                    └────────┬─────────────┘
//!                             ▼
//!                       RRF ──▶ rerank ──▶ results
//! ```
//!
//! The algorithms (strategy selection, splitting, BM25, RRF, caches, context
//! validation) live in the runtime-agnostic `hybrid-context-core` crate.
//! This crate adds SQLite, the HTTP providers, the worker pool and the
//! [`engine::DocumentEngine`] that ties them together.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`], [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, fastembed) |
//! | [`generation`] | Anthropic messages and message batches client |
//! | [`enrich`] | Contextual enricher (streaming and batch modes) |
//! | [`rerank`] | Optional cross-encoder reranker |
//! | [`extract`] | PDF and text extraction |
//! | [`workers`] | Bounded pool for blocking work |
//! | [`engine`] | The `DocumentEngine` handle |
//! | [`ingest`] | Ingestion and contextual migration |
//! | [`search`] | Hybrid search and prompt context |
//! | [`documents`] | Reads, deletion, agent links |
//! | [`stats`] | `hctx stats` |

pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod engine;
pub mod enrich;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod rerank;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod workers;

pub use engine::{DocumentEngine, EngineParts, EngineSettings, RetrievalStrategy};

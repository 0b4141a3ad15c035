//! # Hybrid Context Core
//!
//! Runtime-agnostic logic for Hybrid Context: data models, adaptive
//! chunking, BM25 scoring, rank fusion, caches, context validation, and the
//! store and embedding traits.
//!
//! This crate contains no tokio, sqlx, network, or filesystem code. The
//! `hybrid-context` app crate supplies the SQLite store, the providers and
//! the async orchestration.

pub mod bm25;
pub mod cache;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod models;
pub mod store;
pub mod strategy;

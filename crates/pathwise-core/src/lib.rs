//! # Pathwise Core
//!
//! Shared, WASM-safe logic for Pathwise: learning-resource data models,
//! the vector index abstraction, the embedding trait, deterministic entry
//! identifiers, and the relevance-gated retrieval algorithm.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies.

pub mod embedding;
pub mod ids;
pub mod models;
pub mod retrieval;
pub mod store;

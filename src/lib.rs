//! # Pathwise
//!
//! Retrieval-augmented enrichment of career learning roadmaps.
//!
//! Pathwise builds a semantic index over a small curated knowledge base of
//! learning resources and answers "what should I read for this objective?"
//! with a relevance gate: when nothing in the knowledge base is close
//! enough, it says so instead of recommending a weak match.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │  rag_data/  │──▶│   Builder    │──▶│  SQLite   │
//! │ *.json      │   │ Load+Embed  │   │ vectors   │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │  query   │       │  enrich  │
//!                 │ (gated)  │       │ (fan-out)│
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pathwise build                          # index ./rag_data
//! pathwise query "learn docker basics"    # gated top-k lookup
//! pathwise enrich roadmap.json            # attach sources to each week
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`loader`] | Knowledge-base file discovery and record validation |
//! | [`embedding`] | Embedding providers (local fastembed, Ollama) |
//! | [`builder`] | Index build pipeline |
//! | [`sqlite_store`] | SQLite-backed vector index |
//! | [`retrieval`] | Long-lived retrieval service |
//! | [`enrich`] | Concurrent roadmap enrichment |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`logging`] | tracing subscriber setup |

pub mod builder;
pub mod config;
pub mod db;
pub mod embedding;
pub mod enrich;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod retrieval;
pub mod sqlite_store;

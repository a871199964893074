//! # Narrative Search
//!
//! Semantic sync and retrieval for narrative writing projects.
//!
//! Editors notify the sync service whenever a chapter, character, location,
//! culture or project changes. Changes are debounced, diffed against the
//! stored vector, embedded in batches and persisted. Searches embed the
//! query, rank stored vectors by cosine similarity, load the matching
//! entities from their owning services, and render each one as a context
//! block ready for an LLM prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────────┐   ┌──────────────┐
//! │   Editors    │──▶│ SyncService │──▶│ BatchProcessor │──▶│ VectorStore  │
//! │  (sync_*)    │   │  debounce   │   │  embed+upsert  │   │ SQLite / mem │
//! └──────────────┘   └──────┬──────┘   └────────────────┘   └──────┬───────┘
//!                           │ invalidate                           │
//!                           ▼                                      ▼
//!                    ┌─────────────┐                      ┌────────────────┐
//!                    │ QueryCache  │◀────────────────────▶│ SearchService  │
//!                    │  LRU + TTL  │                      │ hydrate+format │
//!                    └─────────────┘                      └────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | tracing subscriber setup |
//! | [`embedding`] | Embedding provider implementations |
//! | [`batch`] | Batched embedding and persistence |
//! | [`sync`] | Debounced entity sync |
//! | [`hydrate`] | Entity service seams and hit hydration |
//! | [`search`] | Cached semantic search |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`runtime`] | Composition root |
//!
//! Models, content processing, the query cache and the store/provider
//! traits live in `narrative-search-core`, re-exported here.

pub use narrative_search_core;

pub mod batch;
pub mod config;
pub mod db;
pub mod embedding;
pub mod hydrate;
pub mod logging;
pub mod migrate;
pub mod runtime;
pub mod search;
pub mod sqlite_store;
pub mod sync;

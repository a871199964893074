//! # Narrative Search Core
//!
//! Runtime-agnostic logic for Narrative Search: entity models, content
//! extraction and chunking, the LRU+TTL query cache, context formatting,
//! and the vector store and embedding provider traits.
//!
//! This crate contains no tokio, sqlx, network or filesystem I/O. Concrete
//! providers, the debounced sync service and the search orchestrator live in
//! the `narrative-search` app crate.

pub mod cache;
pub mod content;
pub mod context;
pub mod embedding;
pub mod models;
pub mod store;

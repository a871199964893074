//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait defines every persistence operation the sync
//! and search pipeline needs, enabling pluggable backends (SQLite in the
//! app crate, in-memory here).
//!
//! One row exists per `(entity_type, entity_id)`; upserting an existing key
//! replaces content, embedding, model and metadata while keeping its
//! original `created_at`.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{EntityType, SimilarityHit, VectorRow};

/// Parameters for a similarity search within one project.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub project_id: String,
    pub query_vec: Vec<f32>,
    /// Minimum cosine similarity (inclusive).
    pub threshold: f32,
    pub limit: usize,
    /// Restrict to a single entity type.
    pub entity_type: Option<EntityType>,
}

/// Abstract storage backend for entity vectors.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_vector`](VectorStore::get_vector) | Fetch the stored row for one entity |
/// | [`upsert_vector`](VectorStore::upsert_vector) | Insert or replace one row |
/// | [`upsert_vectors`](VectorStore::upsert_vectors) | Insert or replace many rows |
/// | [`delete_vector`](VectorStore::delete_vector) | Remove the row for one entity |
/// | [`semantic_search`](VectorStore::semantic_search) | Cosine similarity search |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Retrieve the stored row for an entity, if any.
    async fn get_vector(&self, entity_type: EntityType, entity_id: &str)
        -> Result<Option<VectorRow>>;

    /// Insert or replace a single row.
    async fn upsert_vector(&self, row: &VectorRow) -> Result<()>;

    /// Insert or replace a group of rows as one write.
    async fn upsert_vectors(&self, rows: &[VectorRow]) -> Result<()>;

    /// Delete the row for an entity. Returns `true` if a row was removed.
    async fn delete_vector(&self, entity_type: EntityType, entity_id: &str) -> Result<bool>;

    /// Return hits with `similarity >= threshold`, best first, at most
    /// `limit` of them.
    async fn semantic_search(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityHit>>;
}

/// Sort hits by descending similarity and truncate to `limit`.
pub fn rank_hits(mut hits: Vec<SimilarityHit>, limit: usize) -> Vec<SimilarityHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

//! In-memory [`VectorStore`] implementation for tests and embedding-free
//! deployments.
//!
//! Rows live in a `HashMap` behind `std::sync::RwLock`. Similarity search
//! is brute-force cosine over every row of the requested project.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{EntityType, SimilarityHit, VectorRow};

use super::{rank_hits, SimilarityQuery, VectorStore};

type RowKey = (EntityType, String);

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    rows: RwLock<HashMap<RowKey, VectorRow>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(map: &mut HashMap<RowKey, VectorRow>, row: &VectorRow) {
        let key = (row.entity_type, row.entity_id.clone());
        let mut stored = row.clone();
        if let Some(existing) = map.get(&key) {
            stored.created_at = existing.created_at;
        }
        map.insert(key, stored);
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn get_vector(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<VectorRow>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(&(entity_type, entity_id.to_string())).cloned())
    }

    async fn upsert_vector(&self, row: &VectorRow) -> Result<()> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        Self::insert(&mut rows, row);
        Ok(())
    }

    async fn upsert_vectors(&self, batch: &[VectorRow]) -> Result<()> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        for row in batch {
            Self::insert(&mut rows, row);
        }
        Ok(())
    }

    async fn delete_vector(&self, entity_type: EntityType, entity_id: &str) -> Result<bool> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.remove(&(entity_type, entity_id.to_string())).is_some())
    }

    async fn semantic_search(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityHit>> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let hits = rows
            .values()
            .filter(|r| r.project_id == query.project_id)
            .filter(|r| query.entity_type.map_or(true, |t| r.entity_type == t))
            .filter_map(|r| {
                let similarity = cosine_similarity(&query.query_vec, &r.embedding);
                (similarity >= query.threshold).then(|| SimilarityHit {
                    entity_type: r.entity_type,
                    entity_id: r.entity_id.clone(),
                    project_id: r.project_id.clone(),
                    similarity,
                    content: r.content.clone(),
                })
            })
            .collect();
        Ok(rank_hits(hits, query.limit))
    }
}

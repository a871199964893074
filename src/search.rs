//! Semantic search with hydration and query caching.
//!
//! # Algorithm
//!
//! ```text
//! query ──▶ blank? ──yes──▶ []
//!             │
//!             ▼
//!        cache.get(query, project) ──hit──▶ filters.apply(cached) ──▶ results
//!             │ miss
//!             ▼
//!        embed(query)
//!             ▼
//!        store.semantic_search(threshold, limit, single entity type)
//!             ▼
//!        hydrate every hit concurrently (missing/failed → dropped)
//!             ▼
//!        format context ──▶ cache.set(unfiltered) ──▶ filters.apply ──▶ results
//! ```
//!
//! The cache key ignores filters. A later request that differs only in
//! filters is answered from the first request's fetched set, which was
//! bounded by the first request's threshold and limit.

use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;

use narrative_search_core::cache::QueryCache;
use narrative_search_core::context::format_context;
use narrative_search_core::embedding::{embed_one, EmbeddingProvider};
use narrative_search_core::models::{HydratedSearchResult, SearchFilters, SimilarityHit};
use narrative_search_core::store::{SimilarityQuery, VectorStore};

use crate::config::SearchConfig;
use crate::hydrate::EntityServices;

pub struct SearchService {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    services: EntityServices,
    cache: Arc<QueryCache>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        services: EntityServices,
        cache: Arc<QueryCache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            provider,
            store,
            services,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Search a project's indexed entities.
    ///
    /// Embedding and similarity-search failures are logged and returned.
    /// Hits whose entity cannot be loaded are dropped with a warning.
    pub async fn search(
        &self,
        query: &str,
        project_id: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<HydratedSearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        if let Some(entry) = self.cache.get(query, project_id) {
            tracing::debug!(project_id, hit_count = entry.hit_count, "query cache hit");
            return Ok(filters.apply(&entry.results));
        }

        let query_vec = embed_one(self.provider.as_ref(), query)
            .await
            .map_err(|e| {
                tracing::error!(project_id, error = %e, "failed to embed search query");
                e
            })?;

        let similarity_query = SimilarityQuery {
            project_id: project_id.to_string(),
            query_vec,
            threshold: filters.min_score.unwrap_or(self.config.default_threshold),
            limit: filters.limit.unwrap_or(self.config.default_limit),
            entity_type: filters.single_entity_type(),
        };

        let hits = self
            .store
            .semantic_search(&similarity_query)
            .await
            .map_err(|e| {
                tracing::error!(project_id, error = %e, "similarity search failed");
                e
            })?;

        let hydrated = join_all(hits.into_iter().map(|hit| self.hydrate_hit(hit))).await;
        let results: Vec<HydratedSearchResult> = hydrated.into_iter().flatten().collect();

        tracing::info!(project_id, results = results.len(), "semantic search complete");

        let filtered = filters.apply(&results);
        self.cache
            .set(query, project_id, results, Some(similarity_query.query_vec));
        Ok(filtered)
    }

    async fn hydrate_hit(&self, hit: SimilarityHit) -> Option<HydratedSearchResult> {
        match self.services.hydrate(hit.entity_type, &hit.entity_id).await {
            Ok(Some(entity)) => Some(HydratedSearchResult {
                entity_type: hit.entity_type,
                entity_id: hit.entity_id,
                similarity: hit.similarity,
                context: format_context(&entity),
                entity,
            }),
            Ok(None) => {
                tracing::warn!(
                    entity_type = %hit.entity_type,
                    entity_id = hit.entity_id.as_str(),
                    "search hit refers to a missing entity; dropping"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    entity_type = %hit.entity_type,
                    entity_id = hit.entity_id.as_str(),
                    error = %e,
                    "failed to hydrate search hit; dropping"
                );
                None
            }
        }
    }
}

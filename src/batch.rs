//! Batched embedding and persistence of extracted content.
//!
//! # Algorithm
//!
//! ```text
//! contents ──▶ split into groups of batch_size
//!                 │
//!                 ▼ per group, in order
//!         one provider.embed(texts) call
//!                 │  (count mismatch → error)
//!                 ▼
//!         zip vectors with sources by index
//!                 │
//!                 ▼
//!         store.upsert_vectors(rows)
//! ```
//!
//! A failure stops processing and propagates. Groups written before the
//! failure stay written; there is no rollback.

use anyhow::{bail, Result};
use std::sync::Arc;

use narrative_search_core::content::ContentProcessor;
use narrative_search_core::embedding::EmbeddingProvider;
use narrative_search_core::models::{ExtractedContent, VectorRow};
use narrative_search_core::store::VectorStore;

/// Maximum texts sent to the provider in one call.
pub const EMBEDDING_BATCH_SIZE: usize = 100;

pub struct BatchProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    processor: ContentProcessor,
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        processor: ContentProcessor,
    ) -> Self {
        Self {
            provider,
            store,
            processor,
            batch_size: EMBEDDING_BATCH_SIZE,
        }
    }

    /// Override the group size. Values below 1 are clamped to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Model recorded on rows written by this processor.
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed and persist `contents`, returning the written rows in input order.
    pub async fn process_batch(&self, contents: &[ExtractedContent]) -> Result<Vec<VectorRow>> {
        if contents.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.provider.model_name().to_string();
        let total_batches = contents.len().div_ceil(self.batch_size);
        let mut rows = Vec::with_capacity(contents.len());

        for (batch_idx, group) in contents.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = group
                .iter()
                .map(|c| self.processor.embedding_text(&c.content).to_string())
                .collect();

            let vectors = self.provider.embed(&texts).await?;
            if vectors.len() != group.len() {
                bail!(
                    "Embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    group.len()
                );
            }

            let batch_rows: Vec<VectorRow> = group
                .iter()
                .zip(vectors)
                .map(|(content, vector)| VectorRow::from_content(content, vector, &model))
                .collect();

            self.store.upsert_vectors(&batch_rows).await?;

            tracing::info!(
                batch = batch_idx + 1,
                total_batches,
                size = batch_rows.len(),
                "embedded batch"
            );
            rows.extend(batch_rows);
        }

        tracing::info!(rows = rows.len(), model = model.as_str(), "batch processing complete");
        Ok(rows)
    }

    /// Re-embed content for entities that may already have rows. Upserts are
    /// idempotent per entity, so this is [`process_batch`](Self::process_batch).
    pub async fn update_embeddings_batch(
        &self,
        contents: &[ExtractedContent],
    ) -> Result<Vec<VectorRow>> {
        self.process_batch(contents).await
    }
}

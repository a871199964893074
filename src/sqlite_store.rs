//! SQLite-backed [`VectorStore`] implementation.
//!
//! Rows live in the `entity_vectors` table (see [`crate::migrate`]) with the
//! embedding stored as a little-endian f32 BLOB. Similarity is computed in
//! Rust over the rows of the requested project whose `dims` match the query
//! vector; rows written by a model of another width are never scored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use narrative_search_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use narrative_search_core::models::{EntityType, SimilarityHit, VectorRow};
use narrative_search_core::store::{rank_hits, SimilarityQuery, VectorStore};

const UPSERT_SQL: &str = r#"
    INSERT INTO entity_vectors (entity_type, entity_id, project_id, source_type, content,
                                embedding, dims, model, metadata_json, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(entity_type, entity_id) DO UPDATE SET
        project_id = excluded.project_id,
        source_type = excluded.source_type,
        content = excluded.content,
        embedding = excluded.embedding,
        dims = excluded.dims,
        model = excluded.model,
        metadata_json = excluded.metadata_json,
        updated_at = excluded.updated_at
"#;

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

type UpsertQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn upsert_query(row: &VectorRow) -> Result<UpsertQuery<'_>> {
    let metadata_json = serde_json::to_string(&row.metadata)?;
    Ok(sqlx::query(UPSERT_SQL)
        .bind(row.entity_type.as_str())
        .bind(&row.entity_id)
        .bind(&row.project_id)
        .bind(row.source_type.as_str())
        .bind(&row.content)
        .bind(vec_to_blob(&row.embedding))
        .bind(row.embedding.len() as i64)
        .bind(&row.model)
        .bind(metadata_json)
        .bind(row.created_at)
        .bind(row.updated_at))
}

fn decode_row(row: &SqliteRow) -> Result<VectorRow> {
    let entity_type: String = row.get("entity_type");
    let source_type: String = row.get("source_type");
    let blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");

    Ok(VectorRow {
        entity_type: entity_type.parse()?,
        entity_id: row.get("entity_id"),
        project_id: row.get("project_id"),
        source_type: source_type.parse()?,
        content: row.get("content"),
        embedding: blob_to_vec(&blob),
        model: row.get("model"),
        metadata: serde_json::from_str(&metadata_json)
            .context("Failed to decode stored vector metadata")?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn get_vector(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<VectorRow>> {
        let row =
            sqlx::query("SELECT * FROM entity_vectors WHERE entity_type = ? AND entity_id = ?")
                .bind(entity_type.as_str())
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn upsert_vector(&self, row: &VectorRow) -> Result<()> {
        upsert_query(row)?
            .execute(&self.pool)
            .await
            .with_context(|| {
                format!(
                    "Failed to upsert vector for {}:{}",
                    row.entity_type, row.entity_id
                )
            })?;
        Ok(())
    }

    async fn upsert_vectors(&self, rows: &[VectorRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            upsert_query(row)?.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_vector(&self, entity_type: EntityType, entity_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM entity_vectors WHERE entity_type = ? AND entity_id = ?")
                .bind(entity_type.as_str())
                .bind(entity_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn semantic_search(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityHit>> {
        let dims = query.query_vec.len() as i64;
        let rows = match query.entity_type {
            Some(entity_type) => {
                sqlx::query(
                    "SELECT entity_type, entity_id, project_id, content, embedding FROM entity_vectors WHERE project_id = ? AND dims = ? AND entity_type = ?",
                )
                .bind(&query.project_id)
                .bind(dims)
                .bind(entity_type.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT entity_type, entity_id, project_id, content, embedding FROM entity_vectors WHERE project_id = ? AND dims = ?",
                )
                .bind(&query.project_id)
                .bind(dims)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(&query.query_vec, &blob_to_vec(&blob));
            if similarity < query.threshold {
                continue;
            }
            let entity_type: String = row.get("entity_type");
            hits.push(SimilarityHit {
                entity_type: entity_type.parse()?,
                entity_id: row.get("entity_id"),
                project_id: row.get("project_id"),
                similarity,
                content: row.get("content"),
            });
        }

        Ok(rank_hits(hits, query.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narrative_search_core::models::SourceType;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteVectorStore {
        let pool = crate::db::connect(&dir.path().join("data/vectors.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        SqliteVectorStore::new(pool)
    }

    fn row(
        entity_type: EntityType,
        source_type: SourceType,
        id: &str,
        embedding: Vec<f32>,
    ) -> VectorRow {
        VectorRow {
            entity_type,
            entity_id: id.to_string(),
            project_id: "p1".to_string(),
            source_type,
            content: format!("stored text for {}", id),
            embedding,
            model: "test-model".to_string(),
            metadata: serde_json::json!({ "elementType": "culture" }),
            created_at: 10,
            updated_at: 10,
        }
    }

    #[tokio::test]
    async fn test_round_trip_and_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let original = row(EntityType::WorldBuilding, SourceType::Culture, "cu1", vec![0.25, -1.5]);
        store.upsert_vector(&original).await.unwrap();
        assert_eq!(
            store.get_vector(EntityType::WorldBuilding, "cu1").await.unwrap(),
            Some(original.clone())
        );

        let mut updated = original.clone();
        updated.content = "rewritten".to_string();
        updated.created_at = 99;
        updated.updated_at = 99;
        store.upsert_vector(&updated).await.unwrap();

        let stored = store
            .get_vector(EntityType::WorldBuilding, "cu1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, "rewritten");
        assert_eq!(stored.created_at, 10);
        assert_eq!(stored.updated_at, 99);

        assert!(store.delete_vector(EntityType::WorldBuilding, "cu1").await.unwrap());
        assert!(store.get_vector(EntityType::WorldBuilding, "cu1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_similarity_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .upsert_vectors(&[
                row(EntityType::Character, SourceType::Character, "far", vec![0.0, 1.0]),
                row(EntityType::Character, SourceType::Character, "near", vec![1.0, 0.05]),
                row(EntityType::Chapter, SourceType::Chapter, "mid", vec![1.0, 0.8]),
            ])
            .await
            .unwrap();

        let query = SimilarityQuery {
            project_id: "p1".to_string(),
            query_vec: vec![1.0, 0.0],
            threshold: 0.5,
            limit: 10,
            entity_type: None,
        };
        let hits = store.semantic_search(&query).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);

        let only_chapters = SimilarityQuery {
            entity_type: Some(EntityType::Chapter),
            ..query
        };
        let hits = store.semantic_search(&only_chapters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_type, EntityType::Chapter);
    }

    #[tokio::test]
    async fn test_search_skips_rows_of_other_widths() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .upsert_vectors(&[
                row(EntityType::Character, SourceType::Character, "same", vec![1.0, 0.0]),
                row(EntityType::Character, SourceType::Character, "wide", vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let query = SimilarityQuery {
            project_id: "p1".to_string(),
            query_vec: vec![0.0, 1.0],
            threshold: 0.0,
            limit: 10,
            entity_type: None,
        };
        let hits = store.semantic_search(&query).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["same"]);
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .upsert_vector(&row(EntityType::Chapter, SourceType::Chapter, "ch", vec![1.0]))
            .await
            .unwrap();
        sqlx::query("UPDATE entity_vectors SET metadata_json = 'not json' WHERE entity_id = 'ch'")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.get_vector(EntityType::Chapter, "ch").await.unwrap_err();
        assert!(err.to_string().contains("metadata"));
    }
}

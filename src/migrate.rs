use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector schema. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per entity; chunked content keeps only the first window's vector.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_vectors (
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entity_vectors_project ON entity_vectors(project_id, entity_type)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

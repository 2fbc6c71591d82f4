use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database and close the pool.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation on an open pool.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One row per chunk; a namespace is rebuilt as a unit.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_chunks (
            namespace TEXT NOT NULL,
            position INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            hash TEXT NOT NULL,
            model TEXT,
            dims INTEGER NOT NULL DEFAULT 0,
            vector BLOB,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_chunks_model ON index_chunks(model)")
        .execute(pool)
        .await?;

    Ok(())
}

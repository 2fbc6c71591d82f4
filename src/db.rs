//! SQLite pool for the persisted retrieval index.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Open (creating if needed) the database at `[db].path`.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    open(&config.db.path).await
}

async fn open(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // Restores may run while a rebuild holds the write lock.
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("nested").join("dir").join("index.sqlite");

        let pool = connect(&config).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
        assert!(config.db.path.exists());
    }
}

//! Database lifecycle and schema migration.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::SqliteConnection;

use crate::error::Result;

use super::Database;

impl Database {
    /// Open (creating if needed) the state store at `path` and run pending
    /// migrations. WAL mode is set on open so telemetry reads and the
    /// resume planner never block a worker's writes (§4.1).
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| crate::error::Error::Config {
                message: format!("invalid state store path: {e}"),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await?;

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: the single `files` table from §3.
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("applying state store migration v1");

        sqlx::query("BEGIN").execute(&mut *conn).await?;

        let result = async {
            sqlx::query(
                r#"
                CREATE TABLE files (
                    item_id TEXT NOT NULL,
                    file_name TEXT NOT NULL,
                    status INTEGER NOT NULL DEFAULT 0,
                    size INTEGER NOT NULL DEFAULT 0,
                    expected_md5 TEXT,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (item_id, file_name)
                )
                "#,
            )
            .execute(&mut *conn)
            .await?;

            sqlx::query("CREATE INDEX idx_files_status ON files(status)")
                .execute(&mut *conn)
                .await?;

            sqlx::query("CREATE INDEX idx_files_item ON files(item_id)")
                .execute(&mut *conn)
                .await?;

            let now = chrono::Utc::now().timestamp();
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
                .bind(now)
                .execute(&mut *conn)
                .await?;

            Ok::<(), crate::error::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("state store migration v1 complete");
        Ok(())
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_creates_parent_dir_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grabia_state.db");
        let db = Database::new(&path).await.unwrap();
        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grabia_state.db");
        Database::new(&path).await.unwrap().close().await;
        // Second open must not re-run migration v1 against an existing schema.
        let db = Database::new(&path).await.unwrap();
        db.close().await;
    }
}

//! File record CRUD (§4.1).

use sqlx::FromRow;

use crate::error::Result;
use crate::types::{FileRecord, Identifier, Status, StatusCounts};

use super::Database;

#[derive(FromRow)]
struct FileRow {
    item_id: String,
    file_name: String,
    status: i64,
    size: i64,
    expected_md5: Option<String>,
    attempt_count: i64,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        FileRecord {
            item_id: row.item_id,
            file_name: row.file_name,
            status: Status::from_i32(row.status as i32),
            size: row.size as u64,
            expected_md5: row.expected_md5,
            attempt_count: row.attempt_count as u32,
        }
    }
}

impl Database {
    /// Idempotent insert: a fresh scan overwrites size/md5 and resets status
    /// to `pending`, *except* for a row already `done` — that one is left
    /// untouched so a rescan of an already-completed item does not requeue
    /// it for a redundant download (§8 resume-idempotence law; §4.1's
    /// "resets status to pending" describes the pending/retrying/failed
    /// case, not a completed one).
    pub async fn upsert(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (item_id, file_name, status, size, expected_md5, attempt_count)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(item_id, file_name) DO UPDATE SET
                status = CASE WHEN files.status = ? THEN files.status ELSE excluded.status END,
                size = excluded.size,
                expected_md5 = excluded.expected_md5,
                attempt_count = CASE WHEN files.status = ? THEN files.attempt_count ELSE 0 END
            "#,
        )
        .bind(&record.item_id)
        .bind(&record.file_name)
        .bind(Status::Pending.to_i32())
        .bind(record.size as i64)
        .bind(&record.expected_md5)
        .bind(Status::Done.to_i32())
        .bind(Status::Done.to_i32())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mutate one record's status and attempt count. The only mutation a
    /// worker ever performs on the state store (§3 "Status is mutated only
    /// by Workers").
    pub async fn set_status(
        &self,
        item_id: &str,
        file_name: &str,
        status: Status,
        attempt_count: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE files SET status = ?, attempt_count = ? WHERE item_id = ? AND file_name = ?",
        )
        .bind(status.to_i32())
        .bind(attempt_count as i64)
        .bind(item_id)
        .bind(file_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Aggregate counts across the whole store (§4.1, feeds `job_*` telemetry).
    pub async fn counts(&self) -> Result<StatusCounts> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(status = ?), 0),
                COALESCE(SUM(status = ?), 0),
                COALESCE(SUM(status = ?), 0),
                COALESCE(SUM(status = ?), 0)
            FROM files
            "#,
        )
        .bind(Status::Done.to_i32())
        .bind(Status::Failed.to_i32())
        .bind(Status::Pending.to_i32())
        .bind(Status::Retrying.to_i32())
        .fetch_one(&self.pool)
        .await?;

        Ok(StatusCounts {
            total: row.0 as u64,
            done: row.1 as u64,
            failed: row.2 as u64,
            pending: row.3 as u64,
            retrying: row.4 as u64,
        })
    }

    /// Distinct item identifiers with any non-`done` row, used to restrict
    /// a resumed scan to incomplete items (§4.1).
    pub async fn pending_items(&self) -> Result<Vec<Identifier>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT item_id FROM files WHERE status != ? ORDER BY item_id",
        )
        .bind(Status::Done.to_i32())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Fetch one record by its primary key, used by the worker's sync
    /// fast-path to recover a stored `expected_md5` after a restart.
    pub async fn get(&self, item_id: &str, file_name: &str) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT item_id, file_name, status, size, expected_md5, attempt_count \
             FROM files WHERE item_id = ? AND file_name = ?",
        )
        .bind(item_id)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FileRecord::from))
    }
}

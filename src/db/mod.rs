//! State store for grab-ia.
//!
//! Single-table SQLite persistence for [`crate::types::FileRecord`] (§3,
//! §4.1). Methods on [`Database`] are organized by domain:
//! - [`migrations`] — connection lifecycle, schema migrations
//! - [`files`] — file record CRUD (upsert, status transitions, counts)

use sqlx::sqlite::SqlitePool;

mod files;
mod migrations;

/// Handle to the crash-safe state store (§4.1).
///
/// Cheaply `Clone`: wraps a `sqlx::SqlitePool`, which is itself an `Arc`
/// around a connection pool. Every method acquires and releases its own
/// connection, so the store is usable concurrently from the scanner and
/// every worker without external locking (WAL mode lets readers proceed
/// alongside the one writer).
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

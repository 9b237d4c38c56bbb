//! SQLite pool construction.
//!
//! Every service opens its own database file with the same pragmas: WAL
//! journal mode so readers never block the single writer, and a busy
//! timeout so concurrent loops back off instead of failing fast.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Open (creating if missing) a file-backed database.
pub async fn connect(path: impl AsRef<Path>) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path.as_ref())
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    Ok(SqlitePoolOptions::new().connect_with(options).await?)
}

/// Open an in-memory database for tests.
///
/// Capped at a single connection: each sqlite `:memory:` connection is its
/// own database, so a larger pool would hand out empty databases.
pub async fn connect_in_memory() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?)
}

/// Apply an embedded DDL script. Statements use `IF NOT EXISTS`, so this is
/// idempotent across restarts.
pub async fn apply_schema(pool: &SqlitePool, ddl: &str) -> Result<(), StoreError> {
    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_pool_applies_schema_idempotently() {
        let pool = connect_in_memory().await.unwrap();
        let ddl = "CREATE TABLE IF NOT EXISTS t (id TEXT PRIMARY KEY);";

        apply_schema(&pool, ddl).await.unwrap();
        apply_schema(&pool, ddl).await.unwrap();

        sqlx::query("INSERT INTO t (id) VALUES ('a')")
            .execute(&pool)
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}

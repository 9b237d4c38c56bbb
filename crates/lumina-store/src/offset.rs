//! Durable consumer offsets.
//!
//! A consumer's watermark is the timestamp such that every event with
//! `created_at <= watermark` has been applied. It is written after each
//! successful batch, so on restart the consumer resumes from where it
//! durably got to, never from memory.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::sqlite::{StoreError, apply_schema};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projector_offsets (
    projector_name TEXT PRIMARY KEY,
    watermark TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Keyed watermark storage in the owning service's own database.
#[derive(Debug, Clone)]
pub struct OffsetStore {
    pool: SqlitePool,
}

impl OffsetStore {
    /// Bind to a pool and ensure the offsets table exists.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        apply_schema(&pool, SCHEMA).await?;
        Ok(Self { pool })
    }

    /// The stored watermark, or `None` on first start.
    pub async fn load(&self, projector_name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT watermark FROM projector_offsets WHERE projector_name = ?")
                .bind(projector_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
        }))
    }

    /// Durably replace the watermark.
    pub async fn save(
        &self,
        projector_name: &str,
        watermark: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO projector_offsets (projector_name, watermark, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (projector_name) DO UPDATE
            SET watermark = excluded.watermark, updated_at = excluded.updated_at
            "#,
        )
        .bind(projector_name)
        .bind(watermark.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

//! The denormalized media view and its guarded mutations.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use lumina_events::{MediaProcessedData, MediaUploadedData};
use lumina_store::apply_schema;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS media_read_models (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    storage_path TEXT NOT NULL,
    status TEXT NOT NULL,
    thumbnail_path TEXT,
    width INTEGER,
    height INTEGER,
    duration_seconds REAL,
    last_event_version INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_read_models_user_id
    ON media_read_models(user_id);
"#;

/// Projected lifecycle state of one media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Uploaded,
    Processed,
    Failed,
    Deleted,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Uploaded => "uploaded",
            MediaStatus::Processed => "processed",
            MediaStatus::Failed => "failed",
            MediaStatus::Deleted => "deleted",
        }
    }
}

/// One row of the media read model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaReadModel {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub storage_path: String,
    pub status: String,
    pub thumbnail_path: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_seconds: Option<f64>,
    /// Highest event version applied to this row; monotonically
    /// non-decreasing.
    pub last_event_version: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// Storage for the media read model. All mutations are keyed by aggregate
/// id and guarded by `last_event_version`: an incoming version at or below
/// the stored one is a no-op, which makes at-least-once delivery safe.
#[derive(Debug, Clone)]
pub struct MediaReadModelStore {
    pool: SqlitePool,
}

impl MediaReadModelStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        apply_schema(&pool, SCHEMA)
            .await
            .map_err(|lumina_store::StoreError::Database(e)| e)?;
        Ok(Self { pool })
    }

    /// Insert (or re-apply) the upload row with status `uploaded`.
    pub async fn apply_uploaded(
        &self,
        id: &str,
        data: &MediaUploadedData,
        version: i64,
        uploaded_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO media_read_models
                (id, user_id, filename, content_type, size, storage_path, status,
                 last_event_version, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, 'uploaded', ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                user_id = excluded.user_id,
                filename = excluded.filename,
                content_type = excluded.content_type,
                size = excluded.size,
                storage_path = excluded.storage_path,
                status = excluded.status,
                last_event_version = excluded.last_event_version,
                uploaded_at = excluded.uploaded_at
            WHERE media_read_models.last_event_version < excluded.last_event_version
            "#,
        )
        .bind(id)
        .bind(&data.user_id)
        .bind(&data.filename)
        .bind(&data.content_type)
        .bind(data.size)
        .bind(&data.storage_path)
        .bind(version)
        .bind(uploaded_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fold in thumbnail and probe results; status becomes `processed`.
    pub async fn apply_processed(
        &self,
        id: &str,
        data: &MediaProcessedData,
        version: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE media_read_models SET
                thumbnail_path = ?,
                width = ?,
                height = ?,
                duration_seconds = ?,
                status = 'processed',
                last_event_version = ?
            WHERE id = ? AND last_event_version < ?
            "#,
        )
        .bind(&data.thumbnail_path)
        .bind(data.width)
        .bind(data.height)
        .bind(data.duration_seconds)
        .bind(version)
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Status-only transition (`failed`, `deleted`).
    pub async fn apply_status(
        &self,
        id: &str,
        status: MediaStatus,
        version: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE media_read_models SET
                status = ?,
                last_event_version = ?
            WHERE id = ? AND last_event_version < ?
            "#,
        )
        .bind(status.as_str())
        .bind(version)
        .bind(id)
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<MediaReadModel>, sqlx::Error> {
        let row = sqlx::query_as::<_, MediaRow>(
            "SELECT * FROM media_read_models WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MediaRow::into_model))
    }

    /// A user's media, newest upload first, deleted rows excluded.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<MediaReadModel>, sqlx::Error> {
        let rows = sqlx::query_as::<_, MediaRow>(
            "SELECT * FROM media_read_models \
             WHERE user_id = ? AND status != 'deleted' \
             ORDER BY uploaded_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MediaRow::into_model).collect())
    }

    /// Filename substring search within a user's media.
    pub async fn search(
        &self,
        user_id: &str,
        term: &str,
    ) -> Result<Vec<MediaReadModel>, sqlx::Error> {
        let pattern = format!("%{term}%");
        let rows = sqlx::query_as::<_, MediaRow>(
            "SELECT * FROM media_read_models \
             WHERE user_id = ? AND status != 'deleted' AND filename LIKE ? \
             ORDER BY uploaded_at DESC",
        )
        .bind(user_id)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MediaRow::into_model).collect())
    }

    /// Drop every row. Only the rebuild path calls this.
    pub async fn truncate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM media_read_models")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Full table contents in key order, for state comparison in tests and
    /// consistency checks.
    pub async fn snapshot(&self) -> Result<Vec<MediaReadModel>, sqlx::Error> {
        let rows = sqlx::query_as::<_, MediaRow>(
            "SELECT * FROM media_read_models ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MediaRow::into_model).collect())
    }
}

#[derive(sqlx::FromRow)]
struct MediaRow {
    id: String,
    user_id: String,
    filename: String,
    content_type: String,
    size: i64,
    storage_path: String,
    status: String,
    thumbnail_path: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    duration_seconds: Option<f64>,
    last_event_version: i64,
    uploaded_at: String,
}

impl MediaRow {
    fn into_model(self) -> MediaReadModel {
        let uploaded_at = DateTime::parse_from_rfc3339(&self.uploaded_at)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(DateTime::UNIX_EPOCH);

        MediaReadModel {
            id: self.id,
            user_id: self.user_id,
            filename: self.filename,
            content_type: self.content_type,
            size: self.size,
            storage_path: self.storage_path,
            status: self.status,
            thumbnail_path: self.thumbnail_path,
            width: self.width,
            height: self.height,
            duration_seconds: self.duration_seconds,
            last_event_version: self.last_event_version,
            uploaded_at,
        }
    }
}

//! Saga persistence.
//!
//! The engine exclusively owns these tables. Every mutation refreshes
//! `updated_at`, which is what the stuck detector keys on.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use lumina_store::apply_schema;

use crate::instance::{SagaInstance, SagaStatus, StepRecord, StepStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sagas (
    id TEXT PRIMARY KEY,
    saga_type TEXT NOT NULL,
    current_step TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'started',
    payload TEXT NOT NULL DEFAULT '{}',
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS saga_steps (
    id TEXT PRIMARY KEY,
    saga_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    result TEXT NOT NULL DEFAULT '{}',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    started_at TEXT,
    completed_at TEXT,
    FOREIGN KEY (saga_id) REFERENCES sagas(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sagas_status ON sagas(status);
CREATE INDEX IF NOT EXISTS idx_sagas_type ON sagas(saga_type);
CREATE INDEX IF NOT EXISTS idx_saga_steps_saga_id ON saga_steps(saga_id);
"#;

const ACTIVE_STATUSES: &str = "('started', 'in_progress', 'compensating')";

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[derive(Debug, Clone)]
pub struct SagaStore {
    pool: SqlitePool,
}

impl SagaStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        apply_schema(&pool, SCHEMA)
            .await
            .map_err(|lumina_store::StoreError::Database(e)| e)?;
        Ok(Self { pool })
    }

    /// Create a new instance in `started` at its first step.
    pub async fn create_saga(
        &self,
        saga_type: &str,
        first_step: &str,
        payload: serde_json::Value,
    ) -> Result<SagaInstance, sqlx::Error> {
        let saga = SagaInstance {
            id: Uuid::new_v4().to_string(),
            saga_type: saga_type.to_string(),
            current_step: first_step.to_string(),
            status: SagaStatus::Started,
            payload,
            started_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sagas (id, saga_type, current_step, status, payload, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&saga.id)
        .bind(&saga.saga_type)
        .bind(&saga.current_step)
        .bind(saga.status.as_str())
        .bind(saga.payload.to_string())
        .bind(saga.started_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(saga.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .execute(&self.pool)
        .await?;

        Ok(saga)
    }

    pub async fn get_saga(&self, id: &str) -> Result<Option<SagaInstance>, sqlx::Error> {
        let row = sqlx::query_as::<_, SagaRow>("SELECT * FROM sagas WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(SagaRow::into_instance))
    }

    /// Every non-terminal saga, oldest first.
    pub async fn list_active(&self) -> Result<Vec<SagaInstance>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SagaRow>(&format!(
            "SELECT * FROM sagas WHERE status IN {ACTIVE_STATUSES} ORDER BY started_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SagaRow::into_instance).collect())
    }

    /// Move the saga to a step with the given status.
    pub async fn set_step(
        &self,
        id: &str,
        current_step: &str,
        status: SagaStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sagas SET current_step = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(current_step)
            .bind(status.as_str())
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal transition: stamps `completed_at`.
    pub async fn finish(&self, id: &str, status: SagaStatus) -> Result<(), sqlx::Error> {
        let now = now_ts();
        sqlx::query("UPDATE sagas SET status = ?, updated_at = ?, completed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fold a step's result into the saga payload under `steps.<name>`.
    pub async fn merge_step_result(
        &self,
        id: &str,
        step_name: &str,
        result: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        let Some(saga) = self.get_saga(id).await? else {
            return Ok(());
        };

        let mut payload = saga.payload;
        if !payload.is_object() {
            payload = serde_json::json!({});
        }
        let steps = payload
            .as_object_mut()
            .map(|map| {
                map.entry("steps")
                    .or_insert_with(|| serde_json::json!({}))
            })
            .and_then(|value| value.as_object_mut());
        if let Some(steps) = steps {
            steps.insert(step_name.to_string(), result.clone());
        }

        sqlx::query("UPDATE sagas SET payload = ?, updated_at = ? WHERE id = ?")
            .bind(payload.to_string())
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewrite `updated_at`. Operator/diagnostic hook; also how the stuck
    /// detector is exercised in tests.
    pub async fn touch_at(&self, id: &str, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sagas SET updated_at = ? WHERE id = ?")
            .bind(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Non-terminal sagas whose last mutation is older than the cutoff.
    pub async fn stuck_sagas(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<SagaInstance>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SagaRow>(
            "SELECT * FROM sagas \
             WHERE status IN ('in_progress', 'compensating') AND updated_at < ? \
             ORDER BY updated_at ASC",
        )
        .bind(older_than.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SagaRow::into_instance).collect())
    }

    /// Start a step attempt record in `executing`.
    pub async fn create_step(
        &self,
        saga_id: &str,
        step_name: &str,
    ) -> Result<StepRecord, sqlx::Error> {
        let record = StepRecord {
            id: Uuid::new_v4().to_string(),
            saga_id: saga_id.to_string(),
            step_name: step_name.to_string(),
            status: StepStatus::Executing,
            result: serde_json::json!({}),
            retry_count: 0,
            last_error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO saga_steps (id, saga_id, step_name, status, result, retry_count, started_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.saga_id)
        .bind(&record.step_name)
        .bind(record.status.as_str())
        .bind(record.result.to_string())
        .bind(
            record
                .started_at
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        )
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    /// Persist a failed attempt so a crashed engine can observe progress.
    pub async fn record_attempt(
        &self,
        step_id: &str,
        retry_count: i64,
        last_error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE saga_steps SET retry_count = ?, last_error = ? WHERE id = ?")
            .bind(retry_count)
            .bind(last_error)
            .bind(step_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a successful forward action's result. The row's status is
    /// settled later, when the success trigger is observed in the log.
    pub async fn record_result(
        &self,
        step_id: &str,
        result: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE saga_steps SET result = ? WHERE id = ?")
            .bind(result.to_string())
            .bind(step_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_step_status(
        &self,
        step_id: &str,
        status: StepStatus,
    ) -> Result<(), sqlx::Error> {
        let completed_at = match status {
            StepStatus::Completed | StepStatus::Failed | StepStatus::Compensated => Some(now_ts()),
            _ => None,
        };

        sqlx::query(
            "UPDATE saga_steps SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(step_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest attempt record for a named step of a saga.
    pub async fn find_step(
        &self,
        saga_id: &str,
        step_name: &str,
    ) -> Result<Option<StepRecord>, sqlx::Error> {
        let row = sqlx::query_as::<_, StepRow>(
            "SELECT * FROM saga_steps WHERE saga_id = ? AND step_name = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(saga_id)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StepRow::into_record))
    }

    /// All step records of a saga in start order.
    pub async fn list_steps(&self, saga_id: &str) -> Result<Vec<StepRecord>, sqlx::Error> {
        let rows = sqlx::query_as::<_, StepRow>(
            "SELECT * FROM saga_steps WHERE saga_id = ? ORDER BY started_at ASC, rowid ASC",
        )
        .bind(saga_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StepRow::into_record).collect())
    }
}

#[derive(sqlx::FromRow)]
struct SagaRow {
    id: String,
    saga_type: String,
    current_step: String,
    status: String,
    payload: String,
    started_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

impl SagaRow {
    fn into_instance(self) -> SagaInstance {
        SagaInstance {
            payload: serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null),
            status: self.status.parse().unwrap_or(SagaStatus::Failed),
            started_at: parse_ts(&self.started_at),
            updated_at: parse_ts(&self.updated_at),
            completed_at: self.completed_at.as_deref().map(parse_ts),
            id: self.id,
            saga_type: self.saga_type,
            current_step: self.current_step,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    saga_id: String,
    step_name: String,
    status: String,
    result: String,
    retry_count: i64,
    last_error: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl StepRow {
    fn into_record(self) -> StepRecord {
        StepRecord {
            status: self.status.parse().unwrap_or(StepStatus::Failed),
            result: serde_json::from_str(&self.result).unwrap_or(serde_json::Value::Null),
            started_at: self.started_at.as_deref().map(parse_ts),
            completed_at: self.completed_at.as_deref().map(parse_ts),
            id: self.id,
            saga_id: self.saga_id,
            step_name: self.step_name,
            retry_count: self.retry_count,
            last_error: self.last_error,
        }
    }
}

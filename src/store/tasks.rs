use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::CoreError;
use crate::store::ts_column;
use crate::traits::{ScheduledTask, TaskPayload, TaskStatus};

/// Durable scheduled-task store.
///
/// Status is only ever written by the dispatcher (claim + terminal marks);
/// task *existence* is only written by supersession and event cancellation.
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically supersede any pending task for `event_id` and insert a new
    /// one, guaranteeing at most one pending task per event.
    pub async fn replace_for_event(
        &self,
        event_id: &str,
        fire_at: DateTime<Utc>,
        payload: &TaskPayload,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ScheduledTask> {
        let id = uuid::Uuid::new_v4().to_string();
        let now_str = now.to_rfc3339();
        let payload_json = serde_json::to_string(payload)?;

        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query(
            "UPDATE tasks SET status = 'completed', updated_at = ?
             WHERE event_id = ? AND status = 'pending'",
        )
        .bind(&now_str)
        .bind(event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "INSERT INTO tasks (id, event_id, fire_at, status, payload, created_at, updated_at)
             VALUES (?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(&id)
        .bind(event_id)
        .bind(fire_at.to_rfc3339())
        .bind(&payload_json)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if superseded > 0 {
            info!(event_id, superseded, "Superseded pending reminder task");
        }

        Ok(ScheduledTask {
            id,
            event_id: Some(event_id.to_string()),
            fire_at,
            status: TaskStatus::Pending,
            payload: payload.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Move any pending task for `event_id` out of pending without creating a
    /// replacement. Used when an event's reminder becomes moot (offset now in
    /// the past, reminders disabled) but the stale task must not fire.
    pub async fn complete_pending_for_event(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'completed', updated_at = ?
             WHERE event_id = ? AND status = 'pending'",
        )
        .bind(now.to_rfc3339())
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All pending tasks due at or before `now`, oldest fire time first.
    pub async fn due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ScheduledTask>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'pending' AND fire_at <= ? ORDER BY fire_at",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task).collect()
    }

    /// Compare-and-swap claim: `pending -> processing`. Fails with
    /// `TaskClaimConflict` when another dispatcher instance got there first.
    pub async fn claim(&self, task_id: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'processing', updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now.to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::ExternalService(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::TaskClaimConflict);
        }
        Ok(())
    }

    pub async fn mark_completed(&self, task_id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.mark(task_id, TaskStatus::Completed, now).await
    }

    pub async fn mark_failed(&self, task_id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.mark(task_id, TaskStatus::Failed, now).await
    }

    async fn mark(
        &self,
        task_id: &str,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now.to_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> anyhow::Result<Option<ScheduledTask>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    /// The pending task for an event, if any. At most one exists by the
    /// supersession invariant.
    pub async fn pending_for_event(
        &self,
        event_id: &str,
    ) -> anyhow::Result<Option<ScheduledTask>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE event_id = ? AND status = 'pending'")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<ScheduledTask> {
    let payload_json: String = row.try_get("payload")?;
    let payload: TaskPayload = serde_json::from_str(&payload_json)?;
    let status: String = row.try_get("status")?;

    Ok(ScheduledTask {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        fire_at: ts_column(row, "fire_at")?,
        status: TaskStatus::parse(&status),
        payload,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}

//! # Postgres Task Queue
//!
//! Tasks live in the `tasks` table. Claiming follows the distributed claiming
//! pattern: a single `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP LOCKED)`
//! so concurrent dispatchers never claim the same row, and an expired
//! `claim_expires_at` makes a row claimable again.

use super::{DeadLetter, TaskQueue};
use crate::error::{FleetError, Result};
use crate::execution::task::{Task, TaskKind, TaskSchedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, payload, next_eligible_at, attempts, failures, first_attempted_at";

#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
    claim_timeout: Duration,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool, claim_timeout: Duration) -> Self {
        Self {
            pool,
            claim_timeout,
        }
    }

    async fn insert(
        executor: &mut sqlx::PgConnection,
        task: &Task,
    ) -> std::result::Result<(), sqlx::Error> {
        let payload = serde_json::to_value(task.kind())
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            "INSERT INTO tasks (id, task_type, payload, next_eligible_at, attempts, failures, first_attempted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(task.id())
        .bind(task.task_type().as_str())
        .bind(payload)
        .bind(task.schedule().next_eligible_at)
        .bind(task.schedule().attempts as i32)
        .bind(task.schedule().failures as i32)
        .bind(task.schedule().first_attempted_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Insert unless a live task with the same payload exists
    async fn insert_follow_up(
        executor: &mut sqlx::PgConnection,
        task: &Task,
    ) -> std::result::Result<(), sqlx::Error> {
        let payload = serde_json::to_value(task.kind())
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let result = sqlx::query(
            "INSERT INTO tasks (id, task_type, payload, next_eligible_at, attempts, failures, first_attempted_at) \
             SELECT $1::uuid, $2::varchar, $3::jsonb, $4::timestamptz, $5::int, $6::int, $7::timestamptz \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM tasks WHERE payload = $3::jsonb AND dead_lettered_at IS NULL) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(task.id())
        .bind(task.task_type().as_str())
        .bind(payload)
        .bind(task.schedule().next_eligible_at)
        .bind(task.schedule().attempts as i32)
        .bind(task.schedule().failures as i32)
        .bind(task.schedule().first_attempted_at)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            debug!(task_id = %task.id(), "Follow-up already pending, skipped");
        }
        Ok(())
    }
}

fn queue_error(operation: &str, err: sqlx::Error) -> FleetError {
    error!("Task queue {} failed: {}", operation, err);
    FleetError::Queue(format!("{operation} failed: {err}"))
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    #[instrument(skip(self, task), fields(task_id = %task.id()))]
    async fn enqueue(&self, task: &Task) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| queue_error("enqueue", e))?;
        Self::insert(&mut conn, task)
            .await
            .map_err(|e| queue_error("enqueue", e))
    }

    #[instrument(skip(self))]
    async fn claim_due(&self, owner: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let expires_at = now
            + chrono::Duration::from_std(self.claim_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET claimed_by = $1, claim_expires_at = $3 \
             WHERE id IN ( \
                 SELECT id FROM tasks \
                 WHERE dead_lettered_at IS NULL \
                   AND next_eligible_at <= $2 \
                   AND (claim_expires_at IS NULL OR claim_expires_at <= $2) \
                 ORDER BY next_eligible_at \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(owner)
        .bind(now)
        .bind(expires_at)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| queue_error("claim", e))?;

        let mut tasks = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by_key(|task| task.schedule().next_eligible_at);

        if !tasks.is_empty() {
            info!(claimed_count = tasks.len(), owner = owner, "Claimed due tasks");
        } else {
            debug!("No due tasks available for claiming");
        }
        Ok(tasks)
    }

    async fn reschedule(&self, task: &Task, owner: &str) -> Result<bool> {
        let schedule = task.schedule();
        let result = sqlx::query(
            "UPDATE tasks SET next_eligible_at = $3, attempts = $4, failures = $5, first_attempted_at = $6, \
             claimed_by = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND claimed_by = $2",
        )
        .bind(task.id())
        .bind(owner)
        .bind(schedule.next_eligible_at)
        .bind(schedule.attempts as i32)
        .bind(schedule.failures as i32)
        .bind(schedule.first_attempted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| queue_error("reschedule", e))?;

        let rescheduled = result.rows_affected() == 1;
        if !rescheduled {
            warn!(task_id = %task.id(), owner = owner, "Reschedule skipped: claim not owned");
        }
        Ok(rescheduled)
    }

    async fn complete(&self, task_id: Uuid, owner: &str, follow_ups: &[Task]) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| queue_error("complete", e))?;

        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND claimed_by = $2")
            .bind(task_id)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| queue_error("complete", e))?;

        if result.rows_affected() == 0 {
            warn!(task_id = %task_id, owner = owner, "Completion skipped: claim not owned");
            tx.rollback()
                .await
                .map_err(|e| queue_error("complete", e))?;
            return Ok(false);
        }

        for follow_up in follow_ups {
            Self::insert_follow_up(&mut tx, follow_up)
                .await
                .map_err(|e| queue_error("complete", e))?;
        }

        tx.commit().await.map_err(|e| queue_error("complete", e))?;
        Ok(true)
    }

    async fn dead_letter(&self, task_id: Uuid, owner: &str, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET dead_lettered_at = NOW(), failure_reason = $3, \
             claimed_by = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND claimed_by = $2",
        )
        .bind(task_id)
        .bind(owner)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| queue_error("dead_letter", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND dead_lettered_at IS NULL"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| queue_error("get", e))?;

        row.map(Task::try_from).transpose()
    }

    async fn pending(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE dead_lettered_at IS NULL \
             ORDER BY next_eligible_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| queue_error("pending", e))?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {TASK_COLUMNS}, failure_reason, dead_lettered_at FROM tasks \
             WHERE dead_lettered_at IS NOT NULL ORDER BY dead_lettered_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| queue_error("dead_letters", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(DeadLetter {
                    reason: row.failure_reason.unwrap_or_default(),
                    dead_lettered_at: row.dead_lettered_at,
                    task: Task::try_from(row.task)?,
                })
            })
            .collect()
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    payload: serde_json::Value,
    next_eligible_at: DateTime<Utc>,
    attempts: i32,
    failures: i32,
    first_attempted_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct DeadLetterRow {
    #[sqlx(flatten)]
    task: TaskRow,
    failure_reason: Option<String>,
    dead_lettered_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = FleetError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let kind: TaskKind = serde_json::from_value(row.payload)?;
        Ok(Task::restore(
            row.id,
            kind,
            TaskSchedule {
                next_eligible_at: row.next_eligible_at,
                attempts: row.attempts.max(0) as u32,
                failures: row.failures.max(0) as u32,
                first_attempted_at: row.first_attempted_at,
            },
        ))
    }
}

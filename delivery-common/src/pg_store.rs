//! Postgres-backed `JobStore`, built around a `FOR UPDATE SKIP LOCKED`
//! reservation query. Both logical queues share one table, distinguished
//! by the `queue` column, so a single reserve statement can serve either
//! queue without a join.
//!
//! This is the one concrete implementation of the `JobStore` contract the
//! rest of the core depends on.

use std::time::Duration;

use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::StoreError;
use crate::message::{JobQueue, JobRecord, JobState, Message};
use crate::store::{Counts, JobStore};

const JOB_COLUMNS: &str = "job_id, queue, message, attempt_count, first_attempted_at, \
     last_error, moved_to_dead_letter_at, state, not_before, created_at, completed_at";

pub struct PgJobStore {
    pool: PgPool,
    table: String,
}

impl PgJobStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(StoreError::ConnectionError)?;

        Ok(Self::new_from_pool(pool))
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            table: "delivery_jobs".to_owned(),
        }
    }
}

#[async_trait::async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(
        &self,
        queue: JobQueue,
        message: Message,
        _max_attempts: i32,
    ) -> Result<i64, StoreError> {
        let query = format!(
            r#"
INSERT INTO "{table}"
    (queue, message, attempt_count, state, created_at)
VALUES
    ($1, $2, 1, 'waiting', NOW())
RETURNING job_id
            "#,
            table = self.table
        );

        let (job_id,): (i64,) = sqlx::query_as(&query)
            .bind(queue.as_str())
            .bind(sqlx::types::Json(message))
            .fetch_one(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "INSERT",
                error,
            })?;

        Ok(job_id)
    }

    async fn reserve(
        &self,
        queue: JobQueue,
        _worker_id: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let query = format!(
            r#"
WITH ready AS (
    SELECT job_id
    FROM "{table}"
    WHERE
        queue = $1
        AND (state = 'waiting' OR (state = 'delayed' AND not_before <= NOW()))
    ORDER BY COALESCE(not_before, created_at) ASC, created_at ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE "{table}"
SET
    state = 'active',
    first_attempted_at = COALESCE("{table}".first_attempted_at, NOW())
FROM ready
WHERE "{table}".job_id = ready.job_id
RETURNING {columns}
            "#,
            table = self.table,
            columns = JOB_COLUMNS
        );

        let record: Option<JobRecord> = sqlx::query_as(&query)
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPDATE",
                error,
            })?;

        Ok(record)
    }

    async fn complete(&self, queue: JobQueue, job_id: i64) -> Result<(), StoreError> {
        let query = format!(
            r#"
UPDATE "{table}"
SET state = 'completed', completed_at = NOW()
WHERE queue = $1 AND job_id = $2
            "#,
            table = self.table
        );

        sqlx::query(&query)
            .bind(queue.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPDATE",
                error,
            })?;

        Ok(())
    }

    async fn fail(
        &self,
        queue: JobQueue,
        job_id: i64,
        error: &str,
        next_delay: Duration,
        next_attempt_count: i32,
    ) -> Result<(), StoreError> {
        let query = format!(
            r#"
UPDATE "{table}"
SET
    state = 'delayed',
    not_before = NOW() + $3 * INTERVAL '1 millisecond',
    attempt_count = $4,
    last_error = $5
WHERE queue = $1 AND job_id = $2
            "#,
            table = self.table
        );

        sqlx::query(&query)
            .bind(queue.as_str())
            .bind(job_id)
            .bind(next_delay.as_millis() as i64)
            .bind(next_attempt_count)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPDATE",
                error,
            })?;

        Ok(())
    }

    async fn move_to_dead_letter(&self, job_id: i64, final_error: &str) -> Result<(), StoreError> {
        let query = format!(
            r#"
UPDATE "{table}"
SET
    queue = $3,
    state = 'waiting',
    not_before = NULL,
    moved_to_dead_letter_at = NOW(),
    last_error = $4
WHERE queue = $1 AND job_id = $2
            "#,
            table = self.table
        );

        let result = sqlx::query(&query)
            .bind(JobQueue::Main.as_str())
            .bind(job_id)
            .bind(JobQueue::DeadLetter.as_str())
            .bind(final_error)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPDATE",
                error,
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job_id));
        }

        Ok(())
    }

    async fn list(
        &self,
        queue: JobQueue,
        state: Option<JobState>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let query = if state.is_some() {
            format!(
                r#"SELECT {columns} FROM "{table}" WHERE queue = $1 AND state = $2
                   ORDER BY created_at ASC OFFSET $3 LIMIT $4"#,
                columns = JOB_COLUMNS,
                table = self.table
            )
        } else {
            format!(
                r#"SELECT {columns} FROM "{table}" WHERE queue = $1
                   ORDER BY created_at ASC OFFSET $2 LIMIT $3"#,
                columns = JOB_COLUMNS,
                table = self.table
            )
        };

        let records = if let Some(state) = state {
            sqlx::query_as(&query)
                .bind(queue.as_str())
                .bind(state.to_string())
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query_as(&query)
                .bind(queue.as_str())
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(|error| StoreError::QueryError {
            command: "SELECT",
            error,
        })?;

        Ok(records)
    }

    async fn get(&self, queue: JobQueue, job_id: i64) -> Result<Option<JobRecord>, StoreError> {
        let query = format!(
            r#"SELECT {columns} FROM "{table}" WHERE queue = $1 AND job_id = $2"#,
            columns = JOB_COLUMNS,
            table = self.table
        );

        let record = sqlx::query_as(&query)
            .bind(queue.as_str())
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT",
                error,
            })?;

        Ok(record)
    }

    async fn remove(&self, queue: JobQueue, job_id: i64) -> Result<(), StoreError> {
        let query = format!(
            r#"DELETE FROM "{table}" WHERE queue = $1 AND job_id = $2"#,
            table = self.table
        );

        sqlx::query(&query)
            .bind(queue.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "DELETE",
                error,
            })?;

        Ok(())
    }

    async fn counts(&self, queue: JobQueue) -> Result<Counts, StoreError> {
        let query = format!(
            r#"SELECT state, COUNT(*) AS n FROM "{table}" WHERE queue = $1 GROUP BY state"#,
            table = self.table
        );

        let rows: Vec<(String, i64)> = sqlx::query_as(&query)
            .bind(queue.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT",
                error,
            })?;

        let mut counts = Counts::default();
        for (state, n) in rows {
            match state.as_str() {
                "waiting" => counts.waiting = n,
                "active" => counts.active = n,
                "completed" => counts.completed = n,
                "failed" => counts.failed = n,
                "delayed" => counts.delayed = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn obliterate(&self, queue: JobQueue) -> Result<(), StoreError> {
        let query = format!(r#"DELETE FROM "{table}" WHERE queue = $1"#, table = self.table);

        sqlx::query(&query)
            .bind(queue.as_str())
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "DELETE",
                error,
            })?;

        Ok(())
    }

    async fn prune_completed(
        &self,
        queue: JobQueue,
        max_age: Duration,
        max_count: i64,
    ) -> Result<u64, StoreError> {
        let max_age_ms = max_age.as_millis() as i64;
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms);

        let by_age = format!(
            r#"DELETE FROM "{table}" WHERE queue = $1 AND state = 'completed' AND completed_at < $2"#,
            table = self.table
        );
        let by_age_result = sqlx::query(&by_age)
            .bind(queue.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "DELETE",
                error,
            })?;

        let by_count = format!(
            r#"
DELETE FROM "{table}"
WHERE job_id IN (
    SELECT job_id FROM "{table}"
    WHERE queue = $1 AND state = 'completed'
    ORDER BY completed_at DESC
    OFFSET $2
)
            "#,
            table = self.table
        );
        let by_count_result = sqlx::query(&by_count)
            .bind(queue.as_str())
            .bind(max_count)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "DELETE",
                error,
            })?;

        Ok(by_age_result.rows_affected() + by_count_result.rows_affected())
    }

    async fn reap_stale(&self, queue: JobQueue, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(older_than.as_millis() as i64);

        let query = format!(
            r#"
UPDATE "{table}"
SET state = 'waiting', not_before = NULL
WHERE queue = $1 AND state = 'active' AND first_attempted_at < $2
            "#,
            table = self.table
        );

        let result = sqlx::query(&query)
            .bind(queue.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "UPDATE",
                error,
            })?;

        Ok(result.rows_affected())
    }
}

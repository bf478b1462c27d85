//! The job store adapter contract. The core depends only on this trait;
//! `pg_store` is the one concrete collaborator that knows the backing
//! store's wire details.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::message::{JobQueue, JobRecord, JobState, Message};

/// Per-state counts for a single logical queue. Dead-letter counts only
/// populate `waiting`/`active`/`completed`; the remaining fields are
/// always zero there, since dead-lettered jobs never carry a
/// `failed`/`delayed` state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically inserts a job. For MAIN submissions the initial state is
    /// `Waiting` with `attempt_count = 1`.
    async fn enqueue(
        &self,
        queue: JobQueue,
        message: Message,
        max_attempts: i32,
    ) -> Result<i64, StoreError>;

    /// Atomically transitions a ready job to `Active` and hands it to the
    /// caller. No two workers may observe the same job as `Active`
    /// simultaneously.
    async fn reserve(
        &self,
        queue: JobQueue,
        worker_id: &str,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Transitions `Active` -> `Completed`.
    async fn complete(&self, queue: JobQueue, job_id: i64) -> Result<(), StoreError>;

    /// Transitions `Active` -> `Delayed`, bumping `attempt_count` to
    /// `next_attempt_count` and setting `not_before = now + next_delay`.
    /// `first_attempted_at` is preserved.
    async fn fail(
        &self,
        queue: JobQueue,
        job_id: i64,
        error: &str,
        next_delay: Duration,
        next_attempt_count: i32,
    ) -> Result<(), StoreError>;

    /// Atomically moves a MAIN job into DEAD_LETTER: all prior fields are
    /// preserved, `moved_to_dead_letter_at` and `last_error` are set, and
    /// the new dead-letter record's state is `Waiting`. All-or-nothing.
    async fn move_to_dead_letter(&self, job_id: i64, final_error: &str) -> Result<(), StoreError>;

    async fn list(
        &self,
        queue: JobQueue,
        state: Option<JobState>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StoreError>;

    async fn get(&self, queue: JobQueue, job_id: i64) -> Result<Option<JobRecord>, StoreError>;

    async fn remove(&self, queue: JobQueue, job_id: i64) -> Result<(), StoreError>;

    async fn counts(&self, queue: JobQueue) -> Result<Counts, StoreError>;

    /// Purges every record in `queue`. Test-reset only.
    async fn obliterate(&self, queue: JobQueue) -> Result<(), StoreError>;

    /// Retention housekeeping: removes completed MAIN jobs older than
    /// `max_age`, then trims the remainder down to `max_count`
    /// oldest-first. Failed/dead-letter jobs are never pruned.
    async fn prune_completed(
        &self,
        queue: JobQueue,
        max_age: Duration,
        max_count: i64,
    ) -> Result<u64, StoreError>;

    /// Stale-reservation reaper: resets `Active` jobs whose reservation
    /// is older than `older_than` back to `Waiting`, so a crashed
    /// worker's jobs become reservable again after a restart.
    async fn reap_stale(&self, queue: JobQueue, older_than: Duration) -> Result<u64, StoreError>;
}

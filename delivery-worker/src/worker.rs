//! The message processor: polls the main queue for a ready job, dispatches
//! it through the channel registry, and resolves the outcome into a store
//! transition. Concurrency is bounded by a semaphore so a burst of ready
//! jobs can't outrun `max_concurrent_jobs`.

use std::sync::Arc;
use std::time::Duration;

use delivery_common::backoff::{self, MAX_ATTEMPTS};
use delivery_common::health::HealthHandle;
use delivery_common::message::JobQueue;
use delivery_common::{ChannelRegistry, JobRecord, JobStore};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::WorkerError;

pub struct MessageWorker {
    name: String,
    store: Arc<dyn JobStore>,
    registry: Arc<ChannelRegistry>,
    poll_interval: Duration,
    max_concurrent_jobs: usize,
    liveness: HealthHandle,
}

impl MessageWorker {
    pub fn new(
        name: &str,
        store: Arc<dyn JobStore>,
        registry: Arc<ChannelRegistry>,
        poll_interval: Duration,
        max_concurrent_jobs: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            name: name.to_owned(),
            store,
            registry,
            poll_interval,
            max_concurrent_jobs,
            liveness,
        }
    }

    /// Runs until `shutdown` reports `true`, then stops reserving new jobs
    /// and waits for in-flight ones to finish before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_jobs));
        let mut in_flight = JoinSet::new();
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.liveness.report_healthy().await;
                    self.report_saturation(&semaphore);

                    if semaphore.available_permits() == 0 {
                        continue;
                    }

                    match self.store.reserve(JobQueue::Main, &self.name).await {
                        Ok(Some(job)) => {
                            self.spawn_job(&semaphore, &mut in_flight, job);
                        }
                        Ok(None) => {}
                        Err(error) => {
                            warn!("job store reservation failed, will retry next tick: {error}");
                        }
                    }
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(join_error) = result {
                        error!("a job processing task panicked: {join_error}");
                    }
                }
            }
        }

        info!("shutdown requested, draining {} in-flight jobs", in_flight.len());
        while let Some(result) = in_flight.join_next().await {
            if let Err(join_error) = result {
                error!("a job processing task panicked during drain: {join_error}");
            }
        }

        Ok(())
    }

    fn report_saturation(&self, semaphore: &Arc<Semaphore>) {
        let utilization =
            1f64 - semaphore.available_permits() as f64 / self.max_concurrent_jobs as f64;
        metrics::gauge!("message_worker_saturation_percent").set(utilization);
    }

    fn spawn_job(&self, semaphore: &Arc<Semaphore>, in_flight: &mut JoinSet<()>, job: JobRecord) {
        let permit = semaphore
            .clone()
            .try_acquire_owned()
            .expect("caller checked available_permits before reserving a job");
        let store = self.store.clone();
        let registry = self.registry.clone();

        metrics::counter!("message_delivery_attempts_total").increment(1);

        in_flight.spawn(async move {
            process_job(store, registry, job).await;
            drop(permit);
        });
    }
}

/// Resolves one reservation's outcome: success completes the job; an
/// unknown channel dead-letters immediately; otherwise the job is
/// retried until `MAX_ATTEMPTS`, then dead-lettered.
async fn process_job(store: Arc<dyn JobStore>, registry: Arc<ChannelRegistry>, job: JobRecord) {
    let message = &job.message.0;
    let result = registry.deliver(message).await;

    match result {
        Ok(()) => {
            if let Err(error) = store.complete(JobQueue::Main, job.job_id).await {
                error!("failed to mark job {} completed: {error}", job.job_id);
                return;
            }
            metrics::counter!("message_delivery_completed_total").increment(1);
        }
        Err(delivery_error) => {
            let k = job.attempt_count;
            let terminal = delivery_error.is_terminal() || k >= MAX_ATTEMPTS;

            if terminal {
                error!(
                    job_id = job.job_id,
                    attempt_count = k,
                    "message delivery failed terminally, moving to dead letter: {delivery_error}"
                );
                if let Err(error) = store
                    .move_to_dead_letter(job.job_id, &delivery_error.to_string())
                    .await
                {
                    error!("failed to dead-letter job {}: {error}", job.job_id);
                }
                metrics::counter!("message_delivery_dead_lettered_total").increment(1);
            } else {
                let next_attempt_count = k + 1;
                let delay = backoff::delay(next_attempt_count as i64);
                warn!(
                    job_id = job.job_id,
                    attempt_count = k,
                    next_attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    "message delivery failed, scheduling retry: {delivery_error}"
                );
                if let Err(error) = store
                    .fail(
                        JobQueue::Main,
                        job.job_id,
                        &delivery_error.to_string(),
                        delay,
                        next_attempt_count,
                    )
                    .await
                {
                    error!("failed to reschedule job {}: {error}", job.job_id);
                }
                metrics::counter!("message_delivery_retried_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delivery_common::error::StoreError;
    use delivery_common::message::{Channel, JobQueueColumn, JobState, JobStateColumn, Message};
    use delivery_common::store::Counts;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        completed: Mutex<Vec<i64>>,
        failed: Mutex<Vec<(i64, i32)>>,
        dead_lettered: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        async fn enqueue(&self, _q: JobQueue, _m: Message, _max: i32) -> Result<i64, StoreError> {
            unimplemented!()
        }
        async fn reserve(&self, _q: JobQueue, _w: &str) -> Result<Option<JobRecord>, StoreError> {
            unimplemented!()
        }
        async fn complete(&self, _q: JobQueue, job_id: i64) -> Result<(), StoreError> {
            self.completed.lock().unwrap().push(job_id);
            Ok(())
        }
        async fn fail(
            &self,
            _q: JobQueue,
            job_id: i64,
            _error: &str,
            _delay: Duration,
            next_attempt_count: i32,
        ) -> Result<(), StoreError> {
            self.failed.lock().unwrap().push((job_id, next_attempt_count));
            Ok(())
        }
        async fn move_to_dead_letter(&self, job_id: i64, _error: &str) -> Result<(), StoreError> {
            self.dead_lettered.lock().unwrap().push(job_id);
            Ok(())
        }
        async fn list(
            &self,
            _q: JobQueue,
            _s: Option<JobState>,
            _o: i64,
            _l: i64,
        ) -> Result<Vec<JobRecord>, StoreError> {
            unimplemented!()
        }
        async fn get(&self, _q: JobQueue, _id: i64) -> Result<Option<JobRecord>, StoreError> {
            unimplemented!()
        }
        async fn remove(&self, _q: JobQueue, _id: i64) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn counts(&self, _q: JobQueue) -> Result<Counts, StoreError> {
            unimplemented!()
        }
        async fn obliterate(&self, _q: JobQueue) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn prune_completed(&self, _q: JobQueue, _a: Duration, _c: i64) -> Result<u64, StoreError> {
            unimplemented!()
        }
        async fn reap_stale(&self, _q: JobQueue, _o: Duration) -> Result<u64, StoreError> {
            unimplemented!()
        }
    }

    struct FlakyRoutine {
        remaining_failures: AtomicUsize,
    }

    #[async_trait]
    impl delivery_common::channels::InternalRoutine for FlakyRoutine {
        async fn invoke(&self, _message: &Message) -> Result<(), delivery_common::DeliveryError> {
            if self.remaining_failures.load(Ordering::SeqCst) > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                Err(delivery_common::DeliveryError::Connection("flaky".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    fn job_with_attempt(attempt_count: i32) -> JobRecord {
        JobRecord {
            job_id: 1,
            queue: JobQueueColumn(JobQueue::Main),
            message: sqlx::types::Json(Message {
                id: "m1".to_owned(),
                channel: Channel::Internal,
                destination: "svc".to_owned(),
                data: serde_json::json!({}),
                metadata: None,
            }),
            attempt_count,
            first_attempted_at: None,
            last_error: None,
            moved_to_dead_letter_at: None,
            state: JobStateColumn(JobState::Active),
            not_before: None,
            created_at: chrono::DateTime::UNIX_EPOCH,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn a_successful_delivery_completes_the_job() {
        let recording = Arc::new(RecordingStore::default());
        let store: Arc<dyn JobStore> = recording.clone();
        let registry = Arc::new(ChannelRegistry::new().register(
            Channel::Internal,
            Arc::new(delivery_common::channels::InternalHandler::default()),
        ));

        process_job(store, registry, job_with_attempt(1)).await;

        assert_eq!(recording.completed.lock().unwrap().as_slice(), &[1]);
    }

    #[tokio::test]
    async fn a_failure_below_max_attempts_reschedules_with_an_incremented_count() {
        let recording = Arc::new(RecordingStore::default());
        let store: Arc<dyn JobStore> = recording.clone();
        let registry = Arc::new(ChannelRegistry::new().register(
            Channel::Internal,
            Arc::new(delivery_common::channels::InternalHandler::new(Arc::new(
                FlakyRoutine {
                    remaining_failures: AtomicUsize::new(1),
                },
            ))),
        ));

        process_job(store, registry, job_with_attempt(3)).await;

        assert_eq!(recording.failed.lock().unwrap().as_slice(), &[(1, 4)]);
        assert!(recording.dead_lettered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_failure_at_max_attempts_dead_letters_instead_of_rescheduling() {
        let recording = Arc::new(RecordingStore::default());
        let store: Arc<dyn JobStore> = recording.clone();
        let registry = Arc::new(ChannelRegistry::new().register(
            Channel::Internal,
            Arc::new(delivery_common::channels::InternalHandler::new(Arc::new(
                FlakyRoutine {
                    remaining_failures: AtomicUsize::new(1),
                },
            ))),
        ));

        process_job(store, registry, job_with_attempt(MAX_ATTEMPTS)).await;

        assert_eq!(recording.dead_lettered.lock().unwrap().as_slice(), &[1]);
        assert!(recording.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn an_unknown_channel_dead_letters_on_the_first_attempt() {
        let recording = Arc::new(RecordingStore::default());
        let store: Arc<dyn JobStore> = recording.clone();
        let registry = Arc::new(ChannelRegistry::new());

        process_job(store, registry, job_with_attempt(1)).await;

        assert_eq!(recording.dead_lettered.lock().unwrap().as_slice(), &[1]);
        assert!(recording.failed.lock().unwrap().is_empty());
    }
}

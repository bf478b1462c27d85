//! The dead-letter processor: drains the dead-letter queue, logs a
//! structured alert for each entry, optionally fans the alert out over
//! email, and retains the record (via `complete`) for inspection and
//! manual requeue.

use std::sync::Arc;
use std::time::Duration;

use delivery_common::channels::EmailHandler;
use delivery_common::health::HealthHandle;
use delivery_common::message::{Channel, JobQueue, Message};
use delivery_common::{ChannelHandler, JobRecord, JobStore};
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct DeadLetterProcessor {
    name: String,
    store: Arc<dyn JobStore>,
    email_handler: Option<Arc<EmailHandler>>,
    alert_recipients: Vec<String>,
    poll_interval: Duration,
    liveness: HealthHandle,
}

impl DeadLetterProcessor {
    pub fn new(
        name: &str,
        store: Arc<dyn JobStore>,
        email_handler: Option<Arc<EmailHandler>>,
        alert_recipients: Vec<String>,
        poll_interval: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            name: name.to_owned(),
            store,
            email_handler,
            alert_recipients,
            poll_interval,
            liveness,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
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
                    match self.store.reserve(JobQueue::DeadLetter, &self.name).await {
                        Ok(Some(job)) => self.process_entry(job).await,
                        Ok(None) => {}
                        Err(error) => {
                            warn!("dead letter reservation failed, will retry next tick: {error}");
                        }
                    }
                }
            }
        }

        info!("shutdown requested, dead letter processor stopping");
    }

    async fn process_entry(&self, job: JobRecord) {
        let message = &job.message.0;

        error!(
            job_id = job.job_id,
            message_id = %message.id,
            channel = %message.channel,
            destination = %message.destination,
            attempt_count = job.attempt_count,
            last_error = job.last_error.as_deref().unwrap_or("<none>"),
            first_attempted_at = ?job.first_attempted_at,
            moved_to_dead_letter_at = ?job.moved_to_dead_letter_at,
            "message moved to dead letter"
        );

        if let Some(handler) = &self.email_handler {
            for recipient in &self.alert_recipients {
                let alert = alert_message(job.job_id, message, &job, recipient);
                if let Err(error) = handler.deliver(&alert).await {
                    warn!("failed to deliver dead-letter alert to {recipient}: {error}");
                }
            }
        }

        if let Err(error) = self.store.complete(JobQueue::DeadLetter, job.job_id).await {
            error!("failed to mark dead-letter entry {} completed: {error}", job.job_id);
        }
    }
}

fn alert_message(job_id: i64, original: &Message, job: &JobRecord, recipient: &str) -> Message {
    let body = format!(
        "Message {message_id} on channel {channel} destined for {destination} was \
         moved to the dead letter queue after {attempt_count} attempts.\n\n\
         Last error: {last_error}\n\n\
         To requeue it, call requeue({job_id}).",
        message_id = original.id,
        channel = original.channel,
        destination = original.destination,
        attempt_count = job.attempt_count,
        last_error = job.last_error.as_deref().unwrap_or("<none>"),
    );

    Message {
        id: format!("dead-letter-alert-{job_id}"),
        channel: Channel::Email,
        destination: recipient.to_owned(),
        data: serde_json::json!({
            "subject": format!("Message {} dead-lettered", original.id),
            "text": body,
        }),
        metadata: None,
    }
}

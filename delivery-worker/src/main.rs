//! Reserves MAIN jobs and dispatches them through the channel registry.
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use delivery_common::channels::{EmailHandler, HttpWebhookHandler, InternalHandler};
use delivery_common::health::HealthRegistry;
use delivery_common::message::{Channel, JobQueue};
use delivery_common::metrics::{serve, setup_metrics_router};
use delivery_common::{ChannelRegistry, JobStore, PgJobStore};
use delivery_worker::config::Config;
use delivery_worker::error::WorkerError;
use delivery_worker::worker::MessageWorker;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register(
            "message-worker".to_string(),
            time::Duration::seconds(2 * config.poll_interval.0.as_secs().max(1) as i64 + 30),
        )
        .await;

    let store: Arc<dyn JobStore> = Arc::new(
        PgJobStore::new(&config.database_url, config.max_pg_connections).await?,
    );

    let email_handler = EmailHandler::new((&config.smtp).into()).map_err(WorkerError::EmailHandlerInit)?;

    let registry = Arc::new(
        ChannelRegistry::new()
            .register(
                Channel::Http,
                Arc::new(HttpWebhookHandler::new(config.request_timeout.0)),
            )
            .register(Channel::Email, Arc::new(email_handler))
            .register(Channel::Internal, Arc::new(InternalHandler::default())),
    );

    let worker = MessageWorker::new(
        &config.worker_name,
        store.clone(),
        registry,
        config.poll_interval.0,
        config.max_concurrent_jobs,
        worker_liveness,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let stale_after = Duration::from_secs(config.stale_reservation_secs);
    let reaper_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(stale_after / 2);
        loop {
            interval.tick().await;
            if let Err(error) = reaper_store.reap_stale(JobQueue::Main, stale_after).await {
                tracing::warn!("stale reservation reap failed: {error}");
            }
        }
    });

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = router.merge(setup_metrics_router());
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await
}

pub async fn index() -> &'static str {
    "delivery-worker"
}

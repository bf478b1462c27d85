//! Drains DEAD_LETTER entries: logs, alerts, and retains each one.
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use envconfig::Envconfig;

use delivery_common::channels::EmailHandler;
use delivery_common::health::HealthRegistry;
use delivery_common::message::JobQueue;
use delivery_common::metrics::setup_metrics_recorder;
use delivery_common::{JobStore, PgJobStore};

use crate::config::Config;
use crate::dead_letter::DeadLetterProcessor;
use crate::error::JanitorError;

mod config;
mod dead_letter;
mod error;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await
}

#[tokio::main]
async fn main() -> Result<(), JanitorError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let processor_liveness = liveness
        .register("dead-letter-processor".to_string(), time::Duration::seconds(60))
        .await;

    let store: Arc<dyn JobStore> =
        Arc::new(PgJobStore::new(&config.database_url, config.max_pg_connections).await?);

    let alert_recipients = config.alert_recipients();
    let email_handler = if alert_recipients.is_empty() {
        None
    } else {
        Some(Arc::new(
            EmailHandler::new((&config.smtp).into()).map_err(JanitorError::EmailHandlerInit)?,
        ))
    };

    let processor = DeadLetterProcessor::new(
        &config.worker_name,
        store.clone(),
        email_handler,
        alert_recipients,
        config.poll_interval.0,
        processor_liveness,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let cleanup_store = store.clone();
    let cleanup_interval_secs = config.cleanup_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            match cleanup_store
                .prune_completed(
                    JobQueue::Main,
                    Duration::from_secs(60 * 60),
                    1000,
                )
                .await
            {
                Ok(pruned) if pruned > 0 => {
                    tracing::info!("pruned {pruned} completed main jobs");
                }
                Ok(_) => {}
                Err(error) => tracing::warn!("prune_completed failed: {error}"),
            }
        }
    });

    let recorder_handle = setup_metrics_recorder();
    let app = handlers::app(Some(recorder_handle));
    let bind = config.bind();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    tokio::select! {
        result = listen(app, bind) => {
            if let Err(error) = result {
                tracing::error!("delivery-janitor http server exited: {error}");
            }
        }
        _ = processor.run(shutdown_rx) => {
            tracing::error!("dead letter processor exited");
        }
    }

    Ok(())
}

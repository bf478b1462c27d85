//! Exposes the submit/list/requeue command surface over HTTP.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;

use delivery_common::health::HealthRegistry;
use delivery_common::metrics::{serve, setup_metrics_router};
use delivery_common::{JobStore, PgJobStore, QueueService};

mod config;
mod error;
mod handlers;

use config::Config;
use error::AdminError;

#[tokio::main]
async fn main() -> Result<(), AdminError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let handle = liveness
        .register("delivery-admin".to_string(), time::Duration::seconds(30))
        .await;
    handle.report_healthy().await;

    let store: Arc<dyn JobStore> = Arc::new(
        PgJobStore::new(&config.database_url, config.max_pg_connections).await?,
    );
    let service = Arc::new(QueueService::new(store));

    let router = Router::new().route(
        "/_liveness",
        axum::routing::get(move || std::future::ready(liveness.get_status())),
    );
    let router = handlers::add_routes(router, service);
    let router = router.merge(setup_metrics_router());

    serve(router, &config.bind()).await?;

    Ok(())
}

use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;

pub fn app(recorder_handle: Option<PrometheusHandle>) -> Router {
    let router = Router::new().route("/", routing::get(index));

    match recorder_handle {
        Some(handle) => router.route("/metrics", routing::get(move || std::future::ready(handle.render()))),
        None => router,
    }
}

pub async fn index() -> &'static str {
    "delivery-janitor"
}

//! Thin axum handlers over `QueueService`: submit, list, inspect, and
//! requeue messages, plus a health index route.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{routing, Json, Router};
use delivery_common::error::QueueServiceError;
use delivery_common::message::{JobQueue, JobState};
use delivery_common::{Counts, JobRecord, QueueService};
use serde::{Deserialize, Serialize};

pub fn add_routes(router: Router, service: Arc<QueueService>) -> Router {
    router
        .route("/", routing::get(index))
        .route("/messages", routing::post(submit))
        .route("/messages/stats", routing::get(stats))
        .route("/messages/main", routing::get(list_main))
        .route("/messages/dead-letter", routing::get(list_dead_letter))
        .route("/messages/:job_id", routing::get(get_job))
        .route("/messages/:job_id/requeue", routing::post(requeue))
        .with_state(service)
}

pub async fn index() -> &'static str {
    "delivery-admin"
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    error: String,
}

fn error_response(error: QueueServiceError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &error {
        QueueServiceError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
        QueueServiceError::NotFound => StatusCode::NOT_FOUND,
        QueueServiceError::NotRequeueable(_) => StatusCode::CONFLICT,
        QueueServiceError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ErrorBody { error: error.to_string() }))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitRequest {
    id: String,
    channel: String,
    destination: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    job_id: i64,
}

async fn submit(
    State(service): State<Arc<QueueService>>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ErrorBody>)> {
    let job_id = service
        .submit_raw(
            payload.id,
            &payload.channel,
            payload.destination,
            payload.data,
            payload.metadata,
        )
        .await
        .map_err(error_response)?;

    Ok(Json(SubmitResponse { job_id }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    main: Counts,
    dead_letter: DeadLetterCounts,
}

/// Dead-letter counts carry only `waiting`/`active`/`completed`: a
/// dead-lettered job never holds `failed`/`delayed` state, so those
/// fields would always read zero.
#[derive(Debug, Serialize)]
pub struct DeadLetterCounts {
    waiting: i64,
    active: i64,
    completed: i64,
}

impl From<Counts> for DeadLetterCounts {
    fn from(counts: Counts) -> Self {
        DeadLetterCounts {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
        }
    }
}

async fn stats(
    State(service): State<Arc<QueueService>>,
) -> Result<Json<StatsResponse>, (StatusCode, Json<ErrorBody>)> {
    let main = service.stats(JobQueue::Main).await.map_err(error_response)?;
    let dead_letter = service
        .stats(JobQueue::DeadLetter)
        .await
        .map_err(error_response)?;

    Ok(Json(StatsResponse {
        main,
        dead_letter: dead_letter.into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    state: Option<String>,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_main(
    State(service): State<Arc<QueueService>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobRecord>>, (StatusCode, Json<ErrorBody>)> {
    let state = query
        .state
        .as_deref()
        .map(JobState::from_str)
        .transpose()
        .map_err(|e| error_response(QueueServiceError::InvalidMessage(e.0)))?;

    let jobs = service
        .list_main(state, query.offset, query.limit)
        .await
        .map_err(error_response)?;

    Ok(Json(jobs))
}

async fn list_dead_letter(
    State(service): State<Arc<QueueService>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobRecord>>, (StatusCode, Json<ErrorBody>)> {
    let jobs = service
        .list_dead_letter(query.offset, query.limit)
        .await
        .map_err(error_response)?;

    Ok(Json(jobs))
}

async fn get_job(
    State(service): State<Arc<QueueService>>,
    Path(job_id): Path<i64>,
) -> Result<Json<JobRecord>, (StatusCode, Json<ErrorBody>)> {
    let job = service.get(job_id).await.map_err(error_response)?;
    Ok(Json(job))
}

async fn requeue(
    State(service): State<Arc<QueueService>>,
    Path(job_id): Path<i64>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ErrorBody>)> {
    let new_job_id = service.requeue(job_id).await.map_err(error_response)?;
    Ok(Json(SubmitResponse { job_id: new_job_id }))
}

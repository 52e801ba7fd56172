use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{JobInfo, JobRequest, TaskOutcome};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::Coordinator;

pub fn build_router(coord: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workers", post(register_worker))
        .route("/notifyTask", post(notify_task))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .layer(TraceLayer::new_for_http())
        .with_state(coord)
}

/* ---------------- handlers ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Body is the worker's base URL as a JSON string.
async fn register_worker(
    State(coord): State<Arc<Coordinator>>,
    Json(address): Json<String>,
) -> Result<String, (StatusCode, String)> {
    if address.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "worker address must not be empty".to_string(),
        ));
    }
    coord.register_worker(address);
    coord.distribute().await;
    Ok("registered".to_string())
}

async fn notify_task(
    State(coord): State<Arc<Coordinator>>,
    Json(outcome): Json<TaskOutcome>,
) -> String {
    coord.report_outcome(&outcome);
    coord.distribute().await;
    "ok".to_string()
}

async fn submit_job(
    State(coord): State<Arc<Coordinator>>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobInfo>, (StatusCode, String)> {
    let info = coord
        .submit(req)
        .map_err(|reason| (StatusCode::BAD_REQUEST, reason))?;
    coord.distribute().await;
    Ok(Json(info))
}

async fn list_jobs(State(coord): State<Arc<Coordinator>>) -> Json<Vec<JobInfo>> {
    Json(coord.jobs())
}

async fn get_job(
    State(coord): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, (StatusCode, String)> {
    coord
        .job(&id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "job not found".to_string()))
}

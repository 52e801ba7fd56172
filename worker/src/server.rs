use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use common::{lookup_workload, TaskDescriptor, TaskId, TaskType};

/// Lifecycle of an accepted task as reported over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AcceptedTask {
    pub descriptor: TaskDescriptor,
    pub state: TaskState,
}

/// Every task this worker has ever accepted, keyed by task id. A retried
/// task re-enters under the same id and overwrites the failed entry.
pub type TaskLedger = Arc<Mutex<HashMap<TaskId, AcceptedTask>>>;

#[derive(Clone)]
pub struct WorkerState {
    pub tasks: TaskLedger,
    pub queue: mpsc::UnboundedSender<TaskDescriptor>,
}

pub fn build_router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", put(accept_task).get(list_tasks))
        .route("/tasks/:id", get(get_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Assignment from the coordinator. Validated and queued; execution is
// sequential, so acceptance never blocks on a running task.
async fn accept_task(
    State(state): State<WorkerState>,
    Json(task): Json<TaskDescriptor>,
) -> Result<Json<TaskDescriptor>, (StatusCode, String)> {
    if task.partitions == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "task must have at least one partition".to_string(),
        ));
    }
    if task.task_type == TaskType::Reduce && task.input_files.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "reduce task without input files".to_string(),
        ));
    }
    if lookup_workload(&task.workload, &task.params).is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("unknown workload: {}", task.workload),
        ));
    }

    info!(
        "accepted {:?} task {} of job {}",
        task.task_type, task.task_id, task.job_id
    );
    {
        let mut tasks = state.tasks.lock().unwrap();
        tasks.insert(
            task.task_id,
            AcceptedTask {
                descriptor: task.clone(),
                state: TaskState::Queued,
            },
        );
    }
    state.queue.send(task.clone()).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "executor is shut down".to_string(),
        )
    })?;
    Ok(Json(task))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskSummary {
    task_id: TaskId,
    task_type: TaskType,
    state: TaskState,
}

async fn list_tasks(State(state): State<WorkerState>) -> Json<Vec<TaskSummary>> {
    let tasks = state.tasks.lock().unwrap();
    let mut summaries: Vec<TaskSummary> = tasks
        .values()
        .map(|t| TaskSummary {
            task_id: t.descriptor.task_id,
            task_type: t.descriptor.task_type,
            state: t.state,
        })
        .collect();
    summaries.sort_by_key(|s| s.task_id);
    Json(summaries)
}

async fn get_task(
    State(state): State<WorkerState>,
    Path(id): Path<TaskId>,
) -> Result<Json<AcceptedTaskView>, (StatusCode, String)> {
    let tasks = state.tasks.lock().unwrap();
    tasks
        .get(&id)
        .map(|t| {
            Json(AcceptedTaskView {
                descriptor: t.descriptor.clone(),
                state: t.state,
            })
        })
        .ok_or((StatusCode::NOT_FOUND, "task not found".to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedTaskView {
    #[serde(flatten)]
    descriptor: TaskDescriptor,
    state: TaskState,
}

/// Records a state transition for a task already in the ledger.
pub fn mark(tasks: &TaskLedger, task_id: TaskId, state: TaskState) {
    let mut tasks = tasks.lock().unwrap();
    if let Some(entry) = tasks.get_mut(&task_id) {
        entry.state = state;
    }
}

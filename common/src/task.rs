use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::job::JobId;

pub type TaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Map,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failure,
}

/// Assignment sent coordinator -> worker (`PUT /tasks`). Re-created with
/// the same id and inputs when a task is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,

    /// Mapper index for MAP tasks, reducer index for REDUCE tasks.
    pub index: u32,

    /// Storage keys: raw input files for MAP, partition files for REDUCE.
    pub input_files: Vec<String>,

    /// Storage key prefix where this task writes its outputs.
    pub target_dir: String,

    /// Reducer count; a MAP task produces this many partition files.
    pub partitions: u32,

    pub workload: String,
    pub params: HashMap<String, String>,

    /// Storage connection descriptor (local root directory).
    pub storage_root: String,
}

/// Completion/failure report, worker -> coordinator (`POST /notifyTask`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub input_files: Vec<String>,
}

/// Partition file written by mapper `mapper` for reducer `reducer`.
/// Deterministic so the coordinator can enumerate reduce inputs without
/// a directory listing.
pub fn partition_file(mapper: u32, reducer: u32) -> String {
    format!("mapper-output-{}-{}.txt", mapper, reducer)
}

/// Final output file of reducer `reducer`.
pub fn reduce_output_file(reducer: u32) -> String {
    format!("output-{}.txt", reducer)
}

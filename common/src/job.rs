use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type JobId = String;

/// Job-wide stage. Exactly one is active per job; transitions are
/// monotonic MAP -> REDUCE -> ENDED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Map,
    Reduce,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub name: String,

    /// Registered workload name, e.g. "wordcount" or "grep".
    pub workload: String,

    /// Workload parameters, e.g. {"pattern": "needle"} for grep.
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Glob over storage keys, relative to the storage root.
    pub input_glob: String,

    pub n_mappers: u32,
    pub n_reducers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub workload: String,
    pub phase: Phase,

    pub n_mappers: u32,
    pub n_reducers: u32,
    pub input_files: Vec<String>,
    pub target_dir: String,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub completed_map_tasks: u32,
    pub completed_reduce_tasks: u32,

    /// Failure reports seen so far; retries are not capped.
    pub retries: u32,
}

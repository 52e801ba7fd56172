use chrono::Utc;
use common::{
    partition_file, JobId, JobInfo, JobRequest, Phase, TaskDescriptor, TaskId,
    TaskOutcome, TaskStatus, TaskType,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Splits `total` items across `parts` tasks: task `i` takes
/// `remaining / (parts - i)` items. Every item is assigned exactly once
/// and shares differ by at most one element.
pub fn split_shares(total: usize, parts: u32) -> Vec<usize> {
    let parts = parts as usize;
    let mut shares = Vec::with_capacity(parts);
    let mut processed = 0;
    for i in 0..parts {
        let remaining = total - processed;
        let share = remaining / (parts - i);
        shares.push(share);
        processed += share;
    }
    shares
}

pub struct WorkerEntry {
    pub address: String,
    /// Task currently running on this worker; `None` means free.
    /// Entries are never removed — worker loss is not modeled.
    pub assigned: Option<TaskId>,
}

struct ActiveJob {
    job_id: JobId,
    phase: Phase,
    map_queue: VecDeque<TaskDescriptor>,
    reduce_queue: VecDeque<TaskDescriptor>,
    /// Canonical descriptors, so a failed task is re-enqueued with the
    /// same id and inputs.
    catalog: HashMap<TaskId, TaskDescriptor>,
    maps_done: u32,
    reduces_done: u32,
    n_mappers: u32,
    n_reducers: u32,
}

struct PreparedJob {
    job_id: JobId,
    map_tasks: Vec<TaskDescriptor>,
    reduce_tasks: Vec<TaskDescriptor>,
    n_mappers: u32,
    n_reducers: u32,
}

#[derive(Default)]
struct CoordState {
    workers: Vec<WorkerEntry>,
    jobs: HashMap<JobId, JobInfo>,
    pending: VecDeque<PreparedJob>,
    active: Option<ActiveJob>,
}

/// Owns all mutable scheduling state behind one lock; the two blocking
/// waits (first worker, job end) are condition-variable style loops on
/// `Notify` handles. The lock is never exposed to callers.
pub struct Coordinator {
    state: Mutex<CoordState>,
    worker_joined: Notify,
    job_done: Notify,
    http: reqwest::Client,
    storage_root: String,
}

impl Coordinator {
    pub fn new(storage_root: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(CoordState::default()),
            worker_joined: Notify::new(),
            job_done: Notify::new(),
            http: reqwest::Client::new(),
            storage_root: storage_root.into(),
        }
    }

    /* ---------------- job intake ---------------- */

    /// Validates the request, expands the input glob against the
    /// storage root, seeds both task queues and either activates the
    /// job or parks it behind the running one.
    pub fn submit(&self, req: JobRequest) -> Result<JobInfo, String> {
        if req.n_mappers == 0 || req.n_reducers == 0 {
            return Err("mapper and reducer counts must be at least 1".to_string());
        }
        if common::lookup_workload(&req.workload, &req.params).is_none() {
            return Err(format!("unknown workload: {}", req.workload));
        }

        let input_files = self.expand_glob(&req.input_glob)?;
        if input_files.is_empty() {
            return Err(format!("input glob matched no files: {}", req.input_glob));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let target_dir = format!("jobs/{}", job_id);
        let (map_tasks, reduce_tasks) =
            self.build_tasks(&job_id, &req, &input_files, &target_dir);

        let job_info = JobInfo {
            id: job_id.clone(),
            name: req.name,
            workload: req.workload,
            phase: Phase::Map,
            n_mappers: req.n_mappers,
            n_reducers: req.n_reducers,
            input_files,
            target_dir,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            completed_map_tasks: 0,
            completed_reduce_tasks: 0,
            retries: 0,
        };

        let prepared = PreparedJob {
            job_id: job_id.clone(),
            map_tasks,
            reduce_tasks,
            n_mappers: req.n_mappers,
            n_reducers: req.n_reducers,
        };

        let mut st = self.state.lock().unwrap();
        st.jobs.insert(job_id.clone(), job_info.clone());
        if st.active.is_none() {
            activate(&mut st, prepared);
        } else {
            info!(job_id = %job_id, "job queued behind active job");
            st.pending.push_back(prepared);
        }
        Ok(job_info)
    }

    fn expand_glob(&self, input_glob: &str) -> Result<Vec<String>, String> {
        let root = self.storage_root.trim_end_matches('/');
        let pattern = format!("{}/{}", root, input_glob);
        let entries =
            glob::glob(&pattern).map_err(|e| format!("invalid input glob: {}", e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| format!("unreadable input: {}", e))?;
            if !path.is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(Path::new(root))
                .map_err(|_| format!("input outside storage root: {}", path.display()))?;
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
        files.sort();
        Ok(files)
    }

    fn build_tasks(
        &self,
        job_id: &str,
        req: &JobRequest,
        input_files: &[String],
        target_dir: &str,
    ) -> (Vec<TaskDescriptor>, Vec<TaskDescriptor>) {
        let shares = split_shares(input_files.len(), req.n_mappers);
        let mut map_tasks = Vec::with_capacity(req.n_mappers as usize);
        let mut offset = 0;
        for (i, share) in shares.into_iter().enumerate() {
            map_tasks.push(TaskDescriptor {
                task_id: i as TaskId,
                job_id: job_id.to_string(),
                task_type: TaskType::Map,
                index: i as u32,
                input_files: input_files[offset..offset + share].to_vec(),
                target_dir: target_dir.to_string(),
                partitions: req.n_reducers,
                workload: req.workload.clone(),
                params: req.params.clone(),
                storage_root: self.storage_root.clone(),
            });
            offset += share;
        }

        // Reduce inputs are the deterministically named partition files
        // of every mapper, known before any mapper has run.
        let mut reduce_tasks = Vec::with_capacity(req.n_reducers as usize);
        for r in 0..req.n_reducers {
            let inputs = (0..req.n_mappers)
                .map(|m| format!("{}/{}", target_dir, partition_file(m, r)))
                .collect();
            reduce_tasks.push(TaskDescriptor {
                task_id: req.n_mappers + r,
                job_id: job_id.to_string(),
                task_type: TaskType::Reduce,
                index: r,
                input_files: inputs,
                target_dir: target_dir.to_string(),
                partitions: req.n_reducers,
                workload: req.workload.clone(),
                params: req.params.clone(),
                storage_root: self.storage_root.clone(),
            });
        }

        (map_tasks, reduce_tasks)
    }

    /* ---------------- worker registry ---------------- */

    /// Adds a worker entry (idempotent per address) and wakes the
    /// first-worker wait. A distribution pass follows every call.
    pub fn register_worker(&self, address: String) {
        let mut st = self.state.lock().unwrap();
        if st.workers.iter().any(|w| w.address == address) {
            info!(%address, "worker re-registered");
        } else {
            info!(%address, "worker registered");
            st.workers.push(WorkerEntry {
                address,
                assigned: None,
            });
        }
        drop(st);
        self.worker_joined.notify_waiters();
    }

    /* ---------------- outcome reporting ---------------- */

    /// Releases the worker holding the task (looked up by assigned task
    /// id), advances the phase counter on success, re-enqueues the
    /// cataloged descriptor on failure. A distribution pass follows
    /// every call.
    pub fn report_outcome(&self, outcome: &TaskOutcome) {
        let mut st = self.state.lock().unwrap();
        let CoordState {
            workers,
            jobs,
            pending,
            active,
        } = &mut *st;

        if let Some(w) = workers
            .iter_mut()
            .find(|w| w.assigned == Some(outcome.task_id))
        {
            w.assigned = None;
        }

        let Some(job) = active.as_mut() else {
            warn!(task_id = outcome.task_id, "outcome with no active job, ignoring");
            return;
        };
        if job.job_id != outcome.job_id {
            warn!(
                task_id = outcome.task_id,
                job_id = %outcome.job_id,
                "outcome for a job that is not active, ignoring"
            );
            return;
        }

        match outcome.status {
            TaskStatus::Failure => {
                info!(
                    task_id = outcome.task_id,
                    "task failed, re-enqueueing with identical descriptor"
                );
                if let Some(info) = jobs.get_mut(&job.job_id) {
                    info.retries += 1;
                }
                if let Some(desc) = job.catalog.get(&outcome.task_id) {
                    match desc.task_type {
                        TaskType::Map => job.map_queue.push_back(desc.clone()),
                        TaskType::Reduce => job.reduce_queue.push_back(desc.clone()),
                    }
                }
            }
            TaskStatus::Success => match (outcome.task_type, job.phase) {
                (TaskType::Map, Phase::Map) => {
                    job.maps_done += 1;
                    if let Some(info) = jobs.get_mut(&job.job_id) {
                        info.completed_map_tasks = job.maps_done;
                    }
                    if job.maps_done == job.n_mappers {
                        job.phase = Phase::Reduce;
                        if let Some(info) = jobs.get_mut(&job.job_id) {
                            info.phase = Phase::Reduce;
                        }
                        info!(job_id = %job.job_id, "all mappers done, phase MAP -> REDUCE");
                    }
                }
                (TaskType::Reduce, Phase::Reduce) => {
                    job.reduces_done += 1;
                    if let Some(info) = jobs.get_mut(&job.job_id) {
                        info.completed_reduce_tasks = job.reduces_done;
                    }
                    if job.reduces_done == job.n_reducers {
                        let job_id = job.job_id.clone();
                        if let Some(info) = jobs.get_mut(&job_id) {
                            info.phase = Phase::Ended;
                            info.finished_at = Some(Utc::now());
                        }
                        info!(job_id = %job_id, "all reducers done, phase REDUCE -> ENDED");
                        *active = None;
                        if let Some(next) = pending.pop_front() {
                            activate(&mut st, next);
                        }
                        drop(st);
                        self.job_done.notify_waiters();
                        return;
                    }
                }
                _ => {
                    warn!(
                        task_id = outcome.task_id,
                        "success report does not match the active phase, ignoring"
                    );
                }
            },
        }
    }

    /* ---------------- distribution ---------------- */

    /// While the active phase's queue is non-empty and a free worker
    /// exists: pop a task, reserve the worker, push the assignment over
    /// HTTP. A failed send puts the task back at the queue head and
    /// ends the pass so one dead worker cannot absorb the whole queue.
    pub async fn distribute(&self) {
        loop {
            let (address, task) = {
                let mut st = self.state.lock().unwrap();
                let CoordState {
                    workers, active, ..
                } = &mut *st;
                let Some(job) = active.as_mut() else { break };
                let queue = match job.phase {
                    Phase::Map => &mut job.map_queue,
                    Phase::Reduce => &mut job.reduce_queue,
                    Phase::Ended => break,
                };
                let Some(free) = workers.iter_mut().find(|w| w.assigned.is_none())
                else {
                    break;
                };
                let Some(task) = queue.pop_front() else { break };
                free.assigned = Some(task.task_id);
                (free.address.clone(), task)
            };

            match self.send_assignment(&address, &task).await {
                Ok(()) => {
                    info!(task_id = task.task_id, worker = %address, "task assigned");
                }
                Err(err) => {
                    warn!(
                        task_id = task.task_id,
                        worker = %address,
                        %err,
                        "assignment failed, requeueing at queue head"
                    );
                    let mut st = self.state.lock().unwrap();
                    if let Some(w) =
                        st.workers.iter_mut().find(|w| w.address == address)
                    {
                        if w.assigned == Some(task.task_id) {
                            w.assigned = None;
                        }
                    }
                    if let Some(job) = st.active.as_mut() {
                        if job.job_id == task.job_id {
                            match task.task_type {
                                TaskType::Map => job.map_queue.push_front(task),
                                TaskType::Reduce => job.reduce_queue.push_front(task),
                            }
                        }
                    }
                    break;
                }
            }
        }
    }

    async fn send_assignment(
        &self,
        address: &str,
        task: &TaskDescriptor,
    ) -> Result<(), String> {
        let url = format!("{}/tasks", address.trim_end_matches('/'));
        let resp = self
            .http
            .put(&url)
            .json(task)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("worker answered {}", resp.status()))
        }
    }

    /* ---------------- waits & introspection ---------------- */

    /// Blocks until at least one worker has registered. No timeout: a
    /// cluster with zero workers waits forever.
    pub async fn wait_for_worker(&self) {
        loop {
            let notified = self.worker_joined.notified();
            if !self.state.lock().unwrap().workers.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Blocks until the job's phase reaches ENDED. A persistently
    /// failing task keeps the job (and this wait) alive forever.
    pub async fn wait_job_done(&self, job_id: &str) {
        loop {
            let notified = self.job_done.notified();
            {
                let st = self.state.lock().unwrap();
                if matches!(st.jobs.get(job_id), Some(j) if j.phase == Phase::Ended) {
                    return;
                }
            }
            notified.await;
        }
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        let st = self.state.lock().unwrap();
        let mut jobs: Vec<JobInfo> = st.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs
    }

    pub fn job(&self, job_id: &str) -> Option<JobInfo> {
        self.state.lock().unwrap().jobs.get(job_id).cloned()
    }
}

fn activate(st: &mut CoordState, prepared: PreparedJob) {
    info!(job_id = %prepared.job_id, "job activated");
    if let Some(info) = st.jobs.get_mut(&prepared.job_id) {
        info.started_at = Some(Utc::now());
    }
    let catalog = prepared
        .map_tasks
        .iter()
        .chain(prepared.reduce_tasks.iter())
        .map(|t| (t.task_id, t.clone()))
        .collect();
    st.active = Some(ActiveJob {
        job_id: prepared.job_id,
        phase: Phase::Map,
        map_queue: prepared.map_tasks.into(),
        reduce_queue: prepared.reduce_tasks.into(),
        catalog,
        maps_done: 0,
        reduces_done: 0,
        n_mappers: prepared.n_mappers,
        n_reducers: prepared.n_reducers,
    });
}

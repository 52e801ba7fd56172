//! End-to-end tests: a real coordinator and real workers talking over
//! HTTP on ephemeral loopback ports, with filesystem-backed storage.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::put, Json, Router};
use common::{
    JobInfo, JobRequest, Phase, Record, TaskDescriptor, TaskOutcome, TaskStatus,
    TaskType,
};
use coordinator::{build_router, Coordinator};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use worker::{start, WorkerConfig, WorkerHandle};

const WORDS: [&str; 4] = ["spark", "merge", "shuffle", "reduce"];

fn storage_with_inputs(sub: &str, files: usize, reps: usize) -> PathBuf {
    let root = env::temp_dir().join("cluster_tests").join(sub);
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(root.join("input")).unwrap();
    let line = format!("{}\n", WORDS.join(" "));
    for i in 0..files {
        fs::write(
            root.join("input").join(format!("file-{}.txt", i)),
            line.repeat(reps),
        )
        .unwrap();
    }
    root
}

async fn start_coordinator(storage_root: &Path) -> String {
    let coord = Arc::new(Coordinator::new(
        storage_root.to_string_lossy().to_string(),
    ));
    let app = build_router(coord);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    url
}

async fn start_workers(coordinator_url: &str, count: usize) -> Vec<WorkerHandle> {
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let handle = start(WorkerConfig {
            bind: "127.0.0.1:0".to_string(),
            coordinator_url: coordinator_url.to_string(),
            advertise_url: None,
        })
        .await
        .unwrap();
        handles.push(handle);
    }
    handles
}

async fn await_job_end(client: &reqwest::Client, base: &str, job_id: &str) -> JobInfo {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let job: JobInfo = client
            .get(format!("{}/jobs/{}", base, job_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if job.phase == Phase::Ended {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {} still in phase {:?} after 30s",
            job_id,
            job.phase
        );
        sleep(Duration::from_millis(100)).await;
    }
}

fn output_counts(root: &Path, job: &JobInfo) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for r in 0..job.n_reducers {
        let path = root
            .join(&job.target_dir)
            .join(common::reduce_output_file(r));
        for line in fs::read_to_string(&path).unwrap().lines() {
            let rec = Record::parse(line).unwrap();
            let n: u64 = rec.value.parse().unwrap();
            assert!(
                counts.insert(rec.key.clone(), n).is_none(),
                "key {} written by more than one reducer",
                rec.key
            );
        }
    }
    counts
}

fn wordcount_request(n_mappers: u32, n_reducers: u32) -> JobRequest {
    JobRequest {
        name: "wc".to_string(),
        workload: "wordcount".to_string(),
        params: HashMap::new(),
        input_glob: "input/*.txt".to_string(),
        n_mappers,
        n_reducers,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wordcount_with_two_workers_and_three_reducers() {
    let (files, reps) = (6, 4);
    let root = storage_with_inputs("two_workers", files, reps);
    let base = start_coordinator(&root).await;
    let workers = start_workers(&base, 2).await;
    let client = reqwest::Client::new();

    let job: JobInfo = client
        .post(format!("{}/jobs", base))
        .json(&wordcount_request(2, 3))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job.input_files.len(), files);

    let ended = await_job_end(&client, &base, &job.id).await;
    assert_eq!(ended.completed_map_tasks, 2);
    assert_eq!(ended.completed_reduce_tasks, 3);
    assert!(ended.finished_at.is_some());

    let counts = output_counts(&root, &ended);
    for word in WORDS {
        assert_eq!(counts[word], (files * reps) as u64, "count for {}", word);
    }

    // the two workers between them ran all five tasks to completion
    let mut seen = 0;
    for handle in &workers {
        let tasks: Vec<serde_json::Value> = client
            .get(format!("{}/tasks", handle.address))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        for task in &tasks {
            assert_eq!(task["state"], "DONE");
            seen += 1;
        }
        handle.shutdown();
    }
    assert_eq!(seen, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wordcount_with_more_mappers_than_files() {
    let (files, reps) = (3, 2);
    let root = storage_with_inputs("five_mappers", files, reps);
    let base = start_coordinator(&root).await;
    let workers = start_workers(&base, 1).await;
    let client = reqwest::Client::new();

    let job: JobInfo = client
        .post(format!("{}/jobs", base))
        .json(&wordcount_request(5, 1))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ended = await_job_end(&client, &base, &job.id).await;
    assert_eq!(ended.completed_map_tasks, 5);
    assert_eq!(ended.completed_reduce_tasks, 1);

    let counts = output_counts(&root, &ended);
    for word in WORDS {
        assert_eq!(counts[word], (files * reps) as u64, "count for {}", word);
    }
    for handle in &workers {
        handle.shutdown();
    }
}

/// A worker that only records its assignments, so the test can script
/// failure and success reports itself.
async fn start_scripted_worker() -> (String, mpsc::UnboundedReceiver<TaskDescriptor>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route(
        "/tasks",
        put(move |Json(task): Json<TaskDescriptor>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(task.clone());
                Json(task)
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, rx)
}

async fn next_assignment(
    rx: &mut mpsc::UnboundedReceiver<TaskDescriptor>,
) -> TaskDescriptor {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no assignment within 5s")
        .expect("assignment channel closed")
}

async fn report(
    client: &reqwest::Client,
    base: &str,
    task: &TaskDescriptor,
    status: TaskStatus,
) {
    let outcome = TaskOutcome {
        task_id: task.task_id,
        job_id: task.job_id.clone(),
        task_type: task.task_type,
        status,
        input_files: task.input_files.clone(),
    };
    client
        .post(format!("{}/notifyTask", base))
        .json(&outcome)
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_map_task_is_reassigned_unchanged_and_the_job_still_ends() {
    let root = storage_with_inputs("retry", 2, 1);
    let base = start_coordinator(&root).await;
    let client = reqwest::Client::new();

    let (worker_url, mut assignments) = start_scripted_worker().await;
    client
        .post(format!("{}/workers", base))
        .json(&worker_url)
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let job: JobInfo = client
        .post(format!("{}/jobs", base))
        .json(&wordcount_request(1, 1))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let first = next_assignment(&mut assignments).await;
    assert_eq!(first.task_type, TaskType::Map);
    report(&client, &base, &first, TaskStatus::Failure).await;

    let retried = next_assignment(&mut assignments).await;
    assert_eq!(retried, first);
    report(&client, &base, &retried, TaskStatus::Success).await;

    let reduce = next_assignment(&mut assignments).await;
    assert_eq!(reduce.task_type, TaskType::Reduce);
    report(&client, &base, &reduce, TaskStatus::Success).await;

    let ended = await_job_end(&client, &base, &job.id).await;
    assert_eq!(ended.retries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_job_and_bad_submission_are_client_errors() {
    let root = storage_with_inputs("errors", 1, 1);
    let base = start_coordinator(&root).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/jobs/no-such-job", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/jobs", base))
        .json(&wordcount_request(0, 1))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let mut req = wordcount_request(1, 1);
    req.workload = "no-such-workload".to_string();
    let resp = client
        .post(format!("{}/jobs", base))
        .json(&req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

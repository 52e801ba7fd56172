use common::JobRequest;
use coordinator::{build_router, Coordinator};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "coordinator=debug,tower_http=info,axum=info".into()
        }))
        .init();

    let bind = env::var("COORDINATOR_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let storage_root = env::var("STORAGE_ROOT").unwrap_or_else(|_| "/data".to_string());

    let coord = Arc::new(Coordinator::new(storage_root));
    let app = build_router(coord.clone());

    let listener = TcpListener::bind(&bind).await.expect("bind coordinator address");
    info!("coordinator listening on {}", listener.local_addr().unwrap());

    // With INPUT_GLOB set, the coordinator starts with one preloaded job
    // and shuts down once it ends. Otherwise it idles awaiting
    // submissions on POST /jobs.
    match preloaded_job_from_env() {
        Some(req) => {
            let info = coord.submit(req).expect("invalid preloaded job");
            info!(job_id = %info.id, "preloaded job submitted");
            let waiter = coord.clone();
            let job_id = info.id.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    waiter.wait_for_worker().await;
                    waiter.distribute().await;
                    waiter.wait_job_done(&job_id).await;
                    info!(job_id = %job_id, "preloaded job ended, shutting down");
                })
                .await
                .unwrap();
        }
        None => {
            axum::serve(listener, app).await.unwrap();
        }
    }
}

fn preloaded_job_from_env() -> Option<JobRequest> {
    let input_glob = env::var("INPUT_GLOB").ok()?;

    let mut params = HashMap::new();
    if let Ok(raw) = env::var("WORKLOAD_PARAMS") {
        // "key=value,key=value"
        for pair in raw.split(',').filter(|p| !p.is_empty()) {
            if let Some((k, v)) = pair.split_once('=') {
                params.insert(k.to_string(), v.to_string());
            }
        }
    }

    Some(JobRequest {
        name: env::var("JOB_NAME").unwrap_or_else(|_| "preloaded".to_string()),
        workload: env::var("WORKLOAD").unwrap_or_else(|_| "wordcount".to_string()),
        params,
        input_glob,
        n_mappers: env_count("N_MAPPERS", 2),
        n_reducers: env_count("N_REDUCERS", 2),
    })
}

fn env_count(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

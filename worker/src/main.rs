use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;
use worker::{start, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "worker=debug,tower_http=info,axum=info".into()
        }))
        .init();

    let config = WorkerConfig {
        bind: env::var("WORKER_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string()),
        coordinator_url: env::var("COORDINATOR_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string()),
        advertise_url: env::var("WORKER_ADVERTISE_URL").ok(),
    };

    let handle = start(config).await?;
    info!("worker serving as {}", handle.address);

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    Ok(())
}

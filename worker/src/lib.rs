use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

pub mod executor;
pub mod server;

pub struct WorkerConfig {
    /// Bind address, e.g. `0.0.0.0:8081`. Port 0 picks an ephemeral one.
    pub bind: String,
    pub coordinator_url: String,
    /// Base URL the coordinator should call back on. Defaults to the
    /// loopback address of the bound port.
    pub advertise_url: Option<String>,
}

pub struct WorkerHandle {
    pub address: String,
    shutdown: broadcast::Sender<()>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Binds the task server, registers with the coordinator and starts the
/// executor loop. The listener is bound before registration, so an
/// assignment sent right after registering cannot be lost.
pub async fn start(config: WorkerConfig) -> anyhow::Result<WorkerHandle> {
    let listener = TcpListener::bind(&config.bind).await?;
    let local = listener.local_addr()?;
    let address = config
        .advertise_url
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", local.port()));

    let tasks = Arc::new(Mutex::new(HashMap::new()));
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let state = server::WorkerState {
        tasks: tasks.clone(),
        queue: queue_tx,
    };
    let app = server::build_router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("task server stopped: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let client = reqwest::Client::new();
    let coordinator_url = config.coordinator_url.trim_end_matches('/').to_string();

    client
        .post(format!("{}/workers", coordinator_url))
        .json(&address)
        .send()
        .await?
        .error_for_status()?;
    info!("registered {} with {}", address, coordinator_url);

    tokio::spawn(executor::run_loop(
        tasks,
        coordinator_url,
        client,
        queue_rx,
        shutdown_rx,
    ));

    Ok(WorkerHandle {
        address,
        shutdown: shutdown_tx,
    })
}

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{JobInfo, JobRequest};
use reqwest::Client;
use std::collections::HashMap;
use std::env;

/// Same convention as the worker:
/// - In Docker: COORDINATOR_URL=http://coordinator:8080
/// - Local: default http://localhost:8080
fn coordinator_base_url() -> String {
    env::var("COORDINATOR_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI for the job coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new job
    Submit {
        #[arg(value_name = "NAME")]
        name: String,

        /// Registered workload to run, e.g. wordcount or grep
        #[arg(long, default_value = "wordcount")]
        workload: String,

        /// Workload parameter as key=value; repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Glob over the input files, relative to the storage root
        #[arg(long, default_value = "input/*")]
        input_glob: String,

        #[arg(long, default_value_t = 2)]
        mappers: u32,

        #[arg(long, default_value_t = 2)]
        reducers: u32,
    },
    /// Show one job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// List all jobs the coordinator knows about
    Jobs,
    /// List the tasks a worker has accepted
    Tasks {
        #[arg(value_name = "WORKER_URL")]
        worker: String,
    },
}

fn parse_params(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    for pair in raw {
        match pair.split_once('=') {
            Some((k, v)) => {
                params.insert(k.to_string(), v.to_string());
            }
            None => bail!("parameter must look like key=value, got {:?}", pair),
        }
    }
    Ok(params)
}

fn print_job(job: &JobInfo) {
    println!("  id: {}", job.id);
    println!("  name: {}", job.name);
    println!("  workload: {}", job.workload);
    println!("  phase: {:?}", job.phase);
    println!(
        "  maps: {}/{}, reduces: {}/{}, retries: {}",
        job.completed_map_tasks,
        job.n_mappers,
        job.completed_reduce_tasks,
        job.n_reducers,
        job.retries
    );
    println!("  inputs: {}", job.input_files.len());
    println!("  target_dir: {}", job.target_dir);
    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref started) = job.started_at {
        println!("  started_at: {}", started);
    }
    if let Some(ref finished) = job.finished_at {
        println!("  finished_at: {}", finished);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = coordinator_base_url();

    match cli.command {
        Commands::Submit {
            name,
            workload,
            params,
            input_glob,
            mappers,
            reducers,
        } => {
            let req = JobRequest {
                name,
                workload,
                params: parse_params(&params)?,
                input_glob,
                n_mappers: mappers,
                n_reducers: reducers,
            };

            let resp = client
                .post(format!("{}/jobs", base_url))
                .json(&req)
                .send()
                .await?;
            if !resp.status().is_success() {
                bail!("submit rejected: {}", resp.text().await?);
            }
            let job: JobInfo = resp.json().await?;
            println!("Job submitted:");
            print_job(&job);
        }

        Commands::Status { id } => {
            let resp = client
                .get(format!("{}/jobs/{}", base_url, id))
                .send()
                .await?;
            if !resp.status().is_success() {
                bail!("{}", resp.text().await?);
            }
            let job: JobInfo = resp.json().await?;
            println!("Job:");
            print_job(&job);
        }

        Commands::Jobs => {
            let jobs: Vec<JobInfo> = client
                .get(format!("{}/jobs", base_url))
                .send()
                .await?
                .json()
                .await?;
            if jobs.is_empty() {
                println!("No jobs.");
            }
            for job in &jobs {
                println!("{} [{:?}] {}", job.id, job.phase, job.name);
            }
        }

        Commands::Tasks { worker } => {
            let tasks: Vec<serde_json::Value> = client
                .get(format!("{}/tasks", worker.trim_end_matches('/')))
                .send()
                .await?
                .json()
                .await?;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in &tasks {
                println!(
                    "{} {} {}",
                    task["taskId"], task["taskType"], task["state"]
                );
            }
        }
    }

    Ok(())
}

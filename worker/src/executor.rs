use std::env;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use common::{
    lexical_cmp, lookup_workload, partition_file, reduce_output_file, FileRecordReader,
    Grouper, LocalStorage, MergeIter, Record, SortPartitionEngine, Storage,
    TaskDescriptor, TaskOutcome, TaskStatus, TaskType,
};

use crate::server::{mark, TaskLedger, TaskState};

const DEFAULT_SPILL_THRESHOLD: usize = 50_000;

fn spill_threshold() -> usize {
    env::var("SPILL_THRESHOLD")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SPILL_THRESHOLD)
}

/// Runs queued tasks one at a time and reports each outcome back to the
/// coordinator. Exits on shutdown or when the acceptance side closes.
pub async fn run_loop(
    tasks: TaskLedger,
    coordinator_url: String,
    client: reqwest::Client,
    mut queue: mpsc::UnboundedReceiver<TaskDescriptor>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.recv() => {
                info!("executor shutting down");
                break;
            }
            task = queue.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        mark(&tasks, task.task_id, TaskState::Running);
        info!(
            "running {:?} task {} of job {}",
            task.task_type, task.task_id, task.job_id
        );

        let work = task.clone();
        let result = tokio::task::spawn_blocking(move || execute_task(&work)).await;
        let status = match result {
            Ok(Ok(())) => TaskStatus::Success,
            Ok(Err(e)) => {
                warn!("task {} of job {} failed: {:#}", task.task_id, task.job_id, e);
                TaskStatus::Failure
            }
            Err(e) => {
                error!("task {} of job {} panicked: {}", task.task_id, task.job_id, e);
                TaskStatus::Failure
            }
        };
        mark(
            &tasks,
            task.task_id,
            match status {
                TaskStatus::Success => TaskState::Done,
                TaskStatus::Failure => TaskState::Failed,
            },
        );

        let outcome = TaskOutcome {
            task_id: task.task_id,
            job_id: task.job_id.clone(),
            task_type: task.task_type,
            status,
            input_files: task.input_files.clone(),
        };
        let url = format!("{}/notifyTask", coordinator_url.trim_end_matches('/'));
        if let Err(e) = client.post(&url).json(&outcome).send().await {
            warn!("could not report task {} outcome: {}", task.task_id, e);
        }
    }
}

/// Local scratch space for one task attempt, removed on drop. Recreated
/// from scratch so a retry never sees a previous attempt's files.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    fn create(tag: &str) -> io::Result<Self> {
        let path = env::temp_dir().join("mr-worker").join(tag);
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub fn execute_task(task: &TaskDescriptor) -> anyhow::Result<()> {
    match task.task_type {
        TaskType::Map => run_map(task),
        TaskType::Reduce => run_reduce(task),
    }
}

/// Map side: feed every input line through the mapper, hash-partition
/// and sort the emitted pairs, upload one partition file per reducer.
fn run_map(task: &TaskDescriptor) -> anyhow::Result<()> {
    let workload = lookup_workload(&task.workload, &task.params)
        .ok_or_else(|| anyhow!("unknown workload: {}", task.workload))?;
    let storage = LocalStorage::new(&task.storage_root);
    let scratch = WorkDir::create(&format!("map-{}-{}", task.job_id, task.task_id))?;

    let mut engine = SortPartitionEngine::new(
        task.partitions,
        spill_threshold(),
        scratch.path(),
        lexical_cmp,
    )?;

    for (i, key) in task.input_files.iter().enumerate() {
        let local = scratch.path().join(format!("input-{}.txt", i));
        storage
            .get(key, &local)
            .with_context(|| format!("fetching input {}", key))?;

        let reader = BufReader::new(File::open(&local)?);
        let mut pairs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            workload
                .mapper
                .map(key, &line, &mut |k, v| pairs.push((k, v)));
            for (k, v) in pairs.drain(..) {
                engine.put(k, v)?;
            }
        }
    }

    let finals = engine.close(&scratch.path().join("out"))?;
    for (r, path) in finals.iter().enumerate() {
        let key = format!(
            "{}/{}",
            task.target_dir,
            partition_file(task.index, r as u32)
        );
        storage
            .put(path, &key)
            .with_context(|| format!("uploading {}", key))?;
    }
    Ok(())
}

/// Reduce side: merge the sorted partition files from every mapper,
/// group by key, run the reducer over each group, upload one output
/// file.
fn run_reduce(task: &TaskDescriptor) -> anyhow::Result<()> {
    let workload = lookup_workload(&task.workload, &task.params)
        .ok_or_else(|| anyhow!("unknown workload: {}", task.workload))?;
    let storage = LocalStorage::new(&task.storage_root);
    let scratch = WorkDir::create(&format!("reduce-{}-{}", task.job_id, task.task_id))?;

    let mut sources = Vec::with_capacity(task.input_files.len());
    for (i, key) in task.input_files.iter().enumerate() {
        let local = scratch.path().join(format!("part-{}.txt", i));
        storage
            .get(key, &local)
            .with_context(|| format!("fetching partition {}", key))?;
        sources.push(FileRecordReader::open(&local)?);
    }

    let merge = MergeIter::new(sources, lexical_cmp)?;
    let mut grouper = Grouper::new(merge);

    let out_name = reduce_output_file(task.index);
    let out_path = scratch.path().join(&out_name);
    let mut writer = BufWriter::new(File::create(&out_path)?);
    let mut write_err: Option<io::Error> = None;

    while let Some((key, mut values)) = grouper.next_group()? {
        workload.reducer.reduce(&key, &mut values, &mut |k, v| {
            if write_err.is_none() {
                if let Err(e) = writeln!(writer, "{}", Record::new(k, v).to_line()) {
                    write_err = Some(e);
                }
            }
        })?;
        if let Some(e) = write_err.take() {
            return Err(e.into());
        }
    }
    writer.flush()?;
    drop(writer);

    let key = format!("{}/{}", task.target_dir, out_name);
    storage
        .put(&out_path, &key)
        .with_context(|| format!("uploading {}", key))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_root(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("executor_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn descriptor(
        task_id: u32,
        task_type: TaskType,
        index: u32,
        input_files: Vec<String>,
        partitions: u32,
        storage_root: &Path,
    ) -> TaskDescriptor {
        TaskDescriptor {
            task_id,
            job_id: "job-test".to_string(),
            task_type,
            index,
            input_files,
            target_dir: "jobs/job-test".to_string(),
            partitions,
            workload: "wordcount".to_string(),
            params: HashMap::new(),
            storage_root: storage_root.to_string_lossy().to_string(),
        }
    }

    /// Runs a whole wordcount job by hand: `mappers` map tasks over the
    /// seeded inputs, then `reducers` reduce tasks, and returns the
    /// summed counts across all output files.
    fn run_wordcount(
        root: &Path,
        inputs: &[(&str, &str)],
        mappers: u32,
        reducers: u32,
    ) -> HashMap<String, u64> {
        let storage = LocalStorage::new(root);
        let mut keys = Vec::new();
        for (name, content) in inputs {
            let src = root.join("seed.txt");
            fs::write(&src, content).unwrap();
            let key = format!("input/{}", name);
            storage.put(&src, &key).unwrap();
            keys.push(key);
        }

        // split inputs round-robin over the mappers; empty shares are fine
        let mut shares: Vec<Vec<String>> = (0..mappers).map(|_| Vec::new()).collect();
        for (i, key) in keys.into_iter().enumerate() {
            shares[i % mappers as usize].push(key);
        }
        for (m, share) in shares.into_iter().enumerate() {
            let task =
                descriptor(m as u32, TaskType::Map, m as u32, share, reducers, root);
            execute_task(&task).unwrap();
        }

        for r in 0..reducers {
            let inputs: Vec<String> = (0..mappers)
                .map(|m| format!("jobs/job-test/{}", partition_file(m, r)))
                .collect();
            let task =
                descriptor(mappers + r, TaskType::Reduce, r, inputs, reducers, root);
            execute_task(&task).unwrap();
        }

        let mut counts = HashMap::new();
        for r in 0..reducers {
            let out = root
                .join("jobs/job-test")
                .join(reduce_output_file(r));
            for line in fs::read_to_string(out).unwrap().lines() {
                let rec = Record::parse(line).unwrap();
                let n: u64 = rec.value.parse().unwrap();
                assert!(
                    counts.insert(rec.key.clone(), n).is_none(),
                    "key {} appears in more than one output file",
                    rec.key
                );
            }
        }
        counts
    }

    #[test]
    fn wordcount_two_mappers_three_reducers() {
        let root = temp_root("wc_2m_3r");
        let counts = run_wordcount(
            &root,
            &[
                ("a.txt", "the quick brown fox\nthe lazy dog\n"),
                ("b.txt", "the end\nquick quick\n"),
            ],
            2,
            3,
        );
        assert_eq!(counts["the"], 3);
        assert_eq!(counts["quick"], 3);
        assert_eq!(counts["fox"], 1);
        assert_eq!(counts["dog"], 1);
    }

    #[test]
    fn wordcount_more_mappers_than_files() {
        let root = temp_root("wc_5m_1r");
        let counts = run_wordcount(
            &root,
            &[
                ("a.txt", "alpha beta\n"),
                ("b.txt", "beta gamma\n"),
            ],
            5,
            1,
        );
        assert_eq!(counts["alpha"], 1);
        assert_eq!(counts["beta"], 2);
        assert_eq!(counts["gamma"], 1);
    }

    #[test]
    fn reduce_fails_on_malformed_partition_line() {
        let root = temp_root("malformed");
        let storage = LocalStorage::new(&root);
        let src = root.join("seed.txt");
        fs::write(&src, "good 1\nmalformedline\n").unwrap();
        storage
            .put(&src, "jobs/job-test/mapper-output-0-0.txt")
            .unwrap();

        let task = descriptor(
            1,
            TaskType::Reduce,
            0,
            vec!["jobs/job-test/mapper-output-0-0.txt".to_string()],
            1,
            &root,
        );
        let err = execute_task(&task).unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn map_fails_when_input_is_missing() {
        let root = temp_root("missing_input");
        let task = descriptor(
            0,
            TaskType::Map,
            0,
            vec!["input/nope.txt".to_string()],
            1,
            &root,
        );
        assert!(execute_task(&task).is_err());
    }

    #[test]
    fn map_output_covers_every_partition() {
        let root = temp_root("map_partitions");
        let storage = LocalStorage::new(&root);
        let src = root.join("seed.txt");
        fs::write(&src, "one two three four five six seven\n").unwrap();
        storage.put(&src, "input/a.txt").unwrap();

        let task = descriptor(
            0,
            TaskType::Map,
            0,
            vec!["input/a.txt".to_string()],
            4,
            &root,
        );
        execute_task(&task).unwrap();

        for r in 0..4 {
            let key = format!("jobs/job-test/{}", partition_file(0, r));
            assert!(root.join(&key).is_file(), "missing {}", key);
        }
    }
}

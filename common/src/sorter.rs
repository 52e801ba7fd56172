use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::merge::{FileRecordReader, MergeIter};
use crate::record::{KeyCmp, Record};

/// Routes `key` to a partition in `[0, partitions)`.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as u32
}

/// Scratch directory for dump files, removed on drop so every exit path
/// of `close` cleans up.
#[derive(Debug)]
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(base: &Path) -> io::Result<Self> {
        let path = base.join(format!("sort-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// External sort with hash partitioning: buffers `put` records per
/// partition, spills sorted dump files at the record-count threshold,
/// and k-way merges each partition's dumps into one sorted file on
/// close.
#[derive(Debug)]
pub struct SortPartitionEngine {
    buffers: Vec<Vec<Record>>,
    dumps: Vec<Vec<PathBuf>>,
    dump_seq: usize,
    threshold: usize,
    scratch: ScratchDir,
    cmp: KeyCmp,
}

impl SortPartitionEngine {
    pub fn new(
        partitions: u32,
        spill_threshold: usize,
        tmp_base: &Path,
        cmp: KeyCmp,
    ) -> io::Result<Self> {
        if partitions == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "partition count must be at least 1",
            ));
        }
        Ok(Self {
            buffers: (0..partitions).map(|_| Vec::new()).collect(),
            dumps: (0..partitions).map(|_| Vec::new()).collect(),
            dump_seq: 0,
            threshold: spill_threshold.max(1),
            scratch: ScratchDir::create(tmp_base)?,
            cmp,
        })
    }

    pub fn partitions(&self) -> u32 {
        self.buffers.len() as u32
    }

    pub fn put(&mut self, key: String, value: String) -> io::Result<()> {
        let pid = partition_for(&key, self.partitions()) as usize;
        self.buffers[pid].push(Record { key, value });
        if self.buffers[pid].len() >= self.threshold {
            self.spill(pid)?;
        }
        Ok(())
    }

    fn spill(&mut self, pid: usize) -> io::Result<()> {
        if self.buffers[pid].is_empty() {
            return Ok(());
        }
        let cmp = self.cmp;
        let mut buffer = std::mem::take(&mut self.buffers[pid]);
        buffer.sort_by(|a, b| cmp(&a.key, &b.key));

        self.dump_seq += 1;
        let path = self
            .scratch
            .path
            .join(format!("dump-{}-{}.txt", pid, self.dump_seq));
        let mut writer = BufWriter::new(File::create(&path)?);
        for rec in &buffer {
            writeln!(writer, "{}", rec.to_line())?;
        }
        writer.flush()?;
        self.dumps[pid].push(path);
        Ok(())
    }

    /// Flushes remaining buffers and merges each partition's dumps into
    /// `part-<pid>.txt` under `out_dir`. Empty partitions still produce
    /// an (empty) file. Dump files are deleted whether or not the merge
    /// succeeds.
    pub fn close(mut self, out_dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)?;
        let mut finals = Vec::with_capacity(self.buffers.len());

        for pid in 0..self.buffers.len() {
            self.spill(pid)?;

            let mut sources = Vec::with_capacity(self.dumps[pid].len());
            for dump in &self.dumps[pid] {
                sources.push(FileRecordReader::open(dump)?);
            }
            let mut merge = MergeIter::new(sources, self.cmp)?;

            let out_path = out_dir.join(format!("part-{}.txt", pid));
            let mut writer = BufWriter::new(File::create(&out_path)?);
            while let Some(rec) = merge.next_record()? {
                writeln!(writer, "{}", rec.to_line())?;
            }
            writer.flush()?;
            finals.push(out_path);
        }

        Ok(finals)
    }
}

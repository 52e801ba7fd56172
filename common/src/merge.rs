use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::record::{KeyCmp, Record};

/// A stream of records, already sorted by the comparator handed to the
/// merge. I/O errors surface through the result rather than ending the
/// stream silently.
pub trait RecordSource {
    fn next_record(&mut self) -> io::Result<Option<Record>>;
}

/// Line-by-line reader over one serialized record file.
pub struct FileRecordReader {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
}

impl FileRecordReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            path,
        })
    }
}

impl RecordSource for FileRecordReader {
    fn next_record(&mut self) -> io::Result<Option<Record>> {
        match self.lines.next() {
            None => Ok(None),
            Some(line) => {
                let line = line?;
                Record::parse(&line).map(Some).map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!("{} (in {})", e, self.path.display()),
                    )
                })
            }
        }
    }
}

/// In-memory source, used by the sorter for freshly sorted buffers and
/// by tests.
pub struct VecSource {
    records: std::vec::IntoIter<Record>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl RecordSource for VecSource {
    fn next_record(&mut self) -> io::Result<Option<Record>> {
        Ok(self.records.next())
    }
}

struct HeapEntry {
    rec: Record,
    src: usize,
    cmp: KeyCmp,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ties on equal keys fall back to the source index. Callers must
        // not rely on that order.
        (self.cmp)(&self.rec.key, &other.rec.key).then(self.src.cmp(&other.src))
    }
}

/// K-way merge over individually sorted sources: a min-heap keyed on
/// each source's head record.
pub struct MergeIter<S: RecordSource> {
    sources: Vec<S>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    cmp: KeyCmp,
}

impl<S: RecordSource> MergeIter<S> {
    pub fn new(mut sources: Vec<S>, cmp: KeyCmp) -> io::Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (src, source) in sources.iter_mut().enumerate() {
            if let Some(rec) = source.next_record()? {
                heap.push(Reverse(HeapEntry { rec, src, cmp }));
            }
        }
        Ok(Self { sources, heap, cmp })
    }

    pub fn has_next(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Pops the minimum record and refills the heap from its source.
    pub fn next_record(&mut self) -> io::Result<Option<Record>> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(rec) = self.sources[entry.src].next_record()? {
            self.heap.push(Reverse(HeapEntry {
                rec,
                src: entry.src,
                cmp: self.cmp,
            }));
        }
        Ok(Some(entry.rec))
    }
}

impl<S: RecordSource> RecordSource for MergeIter<S> {
    fn next_record(&mut self) -> io::Result<Option<Record>> {
        MergeIter::next_record(self)
    }
}

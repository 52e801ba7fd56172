use std::cmp::Ordering;
use std::io;

/// One intermediate key/value pair. Serialized as a single line,
/// `<key><space><value>`. Keys must not contain the space separator and
/// neither side may contain a newline; there is no escaping (accepted
/// limitation of the line format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses one serialized line. A line without the separator is
    /// `InvalidData` and fatal to the task reading it.
    pub fn parse(line: &str) -> io::Result<Record> {
        match line.split_once(' ') {
            Some((key, value)) => Ok(Record {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record line without key/value separator: {:?}", line),
            )),
        }
    }

    pub fn to_line(&self) -> String {
        format!("{} {}", self.key, self.value)
    }
}

/// Key comparator used by the sort, merge and grouping engines. A plain
/// function pointer so heap entries stay `Ord`-implementable.
pub type KeyCmp = fn(&str, &str) -> Ordering;

/// Default ordering: lexicographic on the serialized key.
pub fn lexical_cmp(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

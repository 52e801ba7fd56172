use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// User map function. Called once per input line; emits zero or more
/// key/value pairs.
pub trait Mapper: Send + Sync {
    fn map(&self, source: &str, line: &str, emit: &mut dyn FnMut(String, String));
}

/// User reduce function. Called once per distinct key with a lazy view
/// over that key's values; emitted pairs go straight to the output file.
pub trait Reducer: Send + Sync {
    fn reduce(
        &self,
        key: &str,
        values: &mut dyn Iterator<Item = io::Result<String>>,
        emit: &mut dyn FnMut(String, String),
    ) -> io::Result<()>;
}

#[derive(Clone)]
pub struct Workload {
    pub mapper: Arc<dyn Mapper>,
    pub reducer: Arc<dyn Reducer>,
}

/// Explicit workload registration: implementations are linked in and
/// selected by name from the job description, never discovered from a
/// packaged artifact.
pub fn lookup(name: &str, params: &HashMap<String, String>) -> Option<Workload> {
    match name {
        "wordcount" => Some(Workload {
            mapper: Arc::new(WordCountMapper),
            reducer: Arc::new(WordCountReducer),
        }),
        "grep" => {
            let pattern = params.get("pattern")?.clone();
            Some(Workload {
                mapper: Arc::new(GrepMapper { pattern }),
                reducer: Arc::new(PassThroughReducer),
            })
        }
        _ => None,
    }
}

/* ---------------- wordcount ---------------- */

pub struct WordCountMapper;

impl Mapper for WordCountMapper {
    fn map(&self, _source: &str, line: &str, emit: &mut dyn FnMut(String, String)) {
        for raw in line.split_whitespace() {
            let cleaned: String = raw
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_lowercase();
            if !cleaned.is_empty() {
                emit(cleaned, "1".to_string());
            }
        }
    }
}

pub struct WordCountReducer;

impl Reducer for WordCountReducer {
    fn reduce(
        &self,
        key: &str,
        values: &mut dyn Iterator<Item = io::Result<String>>,
        emit: &mut dyn FnMut(String, String),
    ) -> io::Result<()> {
        let mut total: u64 = 0;
        for value in values {
            let value = value?;
            let count: u64 = value.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non-numeric count {:?} for key {:?}", value, key),
                )
            })?;
            total += count;
        }
        emit(key.to_string(), total.to_string());
        Ok(())
    }
}

/* ---------------- grep ---------------- */

pub struct GrepMapper {
    pattern: String,
}

impl Mapper for GrepMapper {
    fn map(&self, source: &str, line: &str, emit: &mut dyn FnMut(String, String)) {
        if line.contains(&self.pattern) {
            emit(source.to_string(), line.to_string());
        }
    }
}

pub struct PassThroughReducer;

impl Reducer for PassThroughReducer {
    fn reduce(
        &self,
        key: &str,
        values: &mut dyn Iterator<Item = io::Result<String>>,
        emit: &mut dyn FnMut(String, String),
    ) -> io::Result<()> {
        for value in values {
            emit(key.to_string(), value?);
        }
        Ok(())
    }
}

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Shared blob storage seen by coordinator and workers. Keys are
/// relative, slash-separated paths. `put` replaces any existing object,
/// which is what makes task retries idempotent.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str, local_dest: &Path) -> io::Result<()>;
    fn put(&self, local_src: &Path, key: &str) -> io::Result<()>;
    fn list(&self, prefix: &str) -> io::Result<Vec<String>>;
}

/// Filesystem-backed storage rooted at one directory. The only backend
/// shipped here; remote ones plug in behind the same trait.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn get(&self, key: &str, local_dest: &Path) -> io::Result<()> {
        let src = self.resolve(key);
        if !src.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("storage key not found: {}", key),
            ));
        }
        if let Some(parent) = local_dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, local_dest)?;
        Ok(())
    }

    fn put(&self, local_src: &Path, key: &str) -> io::Result<()> {
        let dest = self.resolve(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local_src, &dest)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            self.walk(&self.root.clone(), &mut keys)?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

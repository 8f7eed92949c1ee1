use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::{PipelineError, Result};

/// Keyed storage for opaque cache artifacts.
///
/// A write replaces the whole artifact stored under the key.
pub trait CacheStore {
    /// Reads the artifact stored under `key`, `None` when absent.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `bytes` under `key`, replacing any previous artifact.
    fn persist(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Keys currently holding an artifact, sorted.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Artifacts kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(key: &str) -> PipelineError {
    PipelineError::Cache {
        key: key.to_string(),
        message: "memory store lock poisoned".into(),
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let artifacts = self.artifacts.read().map_err(|_| poisoned(key))?;
        Ok(artifacts.get(key).cloned())
    }

    fn persist(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut artifacts = self.artifacts.write().map_err(|_| poisoned(key))?;
        artifacts.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let artifacts = self.artifacts.read().map_err(|_| poisoned("*"))?;
        Ok(artifacts.keys().cloned().collect())
    }
}

/// Artifacts stored as `<dir>/<key>.json` files.
///
/// Writes go to a temporary sibling that is renamed over the target, so a
/// reader sees either the previous artifact or the new one. Concurrent
/// writers race and the last rename wins.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

const ARTIFACT_EXTENSION: &str = "json";

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ARTIFACT_EXTENSION}"))
    }
}

impl CacheStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.artifact_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn persist(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.artifact_path(key);
        let staging = self
            .dir
            .join(format!(".{key}.{}.tmp", std::process::id()));
        fs::write(&staging, bytes)?;
        fs::rename(&staging, &target)?;
        debug!(path = %target.display(), bytes = bytes.len(), "artifact written");
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_replaces_artifacts() {
        let store = MemoryStore::new();
        assert_eq!(store.load("aggregate").expect("load"), None);

        store.persist("aggregate", b"[1]").expect("persist");
        store.persist("aggregate", b"[2]").expect("persist");

        assert_eq!(store.load("aggregate").expect("load"), Some(b"[2]".to_vec()));
        assert_eq!(store.keys().expect("keys"), vec!["aggregate".to_string()]);
    }

    #[test]
    fn file_store_round_trips_and_lists_keys() {
        let dir = tempdir().expect("temporary directory");
        let store = FileStore::new(dir.path().join("cache"));

        assert!(store.keys().expect("keys").is_empty());
        assert_eq!(store.load("long_table").expect("load"), None);

        store.persist("long_table", b"{}").expect("persist");
        store.persist("aggregate", b"[]").expect("persist");

        assert_eq!(store.load("long_table").expect("load"), Some(b"{}".to_vec()));
        assert_eq!(
            store.keys().expect("keys"),
            vec!["aggregate".to_string(), "long_table".to_string()]
        );
    }
}

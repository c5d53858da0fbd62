//! Persisted stage state
//!
//! Stages that remember an operator decision across runs (for example a
//! permanently declined optional feature) keep a small integer under their own
//! key. The file store writes `state.json` atomically via temp file + rename.

use crate::core::error::{InstallError, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key/value store for per-stage persisted state.
pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> Option<i64>;
    fn store(&self, key: &str, value: i64) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

/// JSON file backed store.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, i64>>,
}

impl FileStateStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| match serde_json::from_str(&text) {
                Ok(map) => Some(map),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt state file");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, i64>) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| InstallError::io(format!("cannot create {}", dir.display()), e))?;

        let body = serde_json::to_string_pretty(values)
            .map_err(|e| InstallError::Config(format!("cannot encode state: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| InstallError::io("cannot create temporary state file", e))?;
        tmp.write_all(body.as_bytes())
            .map_err(|e| InstallError::io("cannot write state", e))?;
        tmp.persist(&self.path).map_err(|e| {
            InstallError::io(format!("cannot replace {}", self.path.display()), e.error)
        })?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, i64>)) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut values);
        self.persist(&values)
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> Option<i64> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key).copied()
    }

    fn store(&self, key: &str, value: i64) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value);
        })
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<BTreeMap<String, i64>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> Option<i64> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key).copied()
    }

    fn store(&self, key: &str, value: i64) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.remove(key);
        Ok(())
    }
}

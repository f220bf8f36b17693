//! Durable key-value storage
//!
//! A small JSON map of string keys to string values persisted to one file.
//! Writes go to a temp file in the same directory and are renamed into place,
//! so a crash never leaves a half-written state file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

/// Errors from the persisted store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed string map
pub struct KeyValueStore {
    /// Backing file, `None` for a purely in-memory store
    path: Option<PathBuf>,
    /// Current contents
    values: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore {
    /// Open the store at `path`, loading whatever is already there.
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = load(&path);
        debug!(path = %path.display(), keys = values.len(), "Opened state file");
        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(&[(key, Some(value))])
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(&[(key, None)])
    }

    /// Apply several writes as one unit.
    ///
    /// `None` removes the key. Readers see either none or all of the changes.
    pub fn update(&self, changes: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap();
        let mut next = values.clone();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    next.insert((*key).to_string(), (*value).to_string());
                }
                None => {
                    next.remove(*key);
                }
            }
        }

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *values = next;
        Ok(())
    }

    /// Keys starting with `prefix`
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.values
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn load(path: &Path) -> BTreeMap<String, String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(_) => return BTreeMap::new(),
    };

    match serde_json::from_slice(&data) {
        Ok(values) => values,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt state file, starting empty");
            BTreeMap::new()
        }
    }
}

fn persist(path: &Path, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let json = serde_json::to_vec_pretty(values)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&json)?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    debug!(path = %path.display(), keys = values.len(), "Persisted state file");
    Ok(())
}

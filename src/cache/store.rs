//! Generational response store
//!
//! Responses live in named generations, one per build. A generation is a
//! directory of entry files under the cache root, fronted by a Moka cache
//! weighed by body size. Generations left on disk by earlier runs are picked
//! up again at startup, so activation can purge what an older build stored
//! and the current build's shell survives a restart.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use moka::sync::Cache;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info, trace, warn};

use super::errors::CacheError;
use super::fetch::{Response, ResponseKind};

/// Default per-entry size limit: 10 MB
const DEFAULT_MAX_ENTRY_BYTES: u64 = 10 * 1024 * 1024;

/// Default in-memory budget per generation: 256 MB
const DEFAULT_MAX_GENERATION_BYTES: u64 = 256 * 1024 * 1024;

/// Extension of entry files
const ENTRY_EXTENSION: &str = "json";

/// Extension of in-flight writes
const TEMP_EXTENSION: &str = "tmp";

/// A stored response snapshot
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub url: Url,
    /// When this entry was cached
    pub cached_at: SystemTime,
}

impl CachedEntry {
    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            url: response.url.clone(),
            cached_at: SystemTime::now(),
        }
    }

    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            url: self.url.clone(),
            kind: ResponseKind::Basic,
        }
    }
}

/// On-disk form of an entry
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    /// Full cache key, checked on read
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    url: String,
    /// Base64-encoded body
    body: String,
    /// Seconds since the Unix epoch
    cached_at: u64,
}

impl StoredEntry {
    fn new(key: &str, entry: &CachedEntry) -> Self {
        Self {
            key: key.to_string(),
            status: entry.status.as_u16(),
            headers: entry
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            url: entry.url.to_string(),
            body: base64::engine::general_purpose::STANDARD.encode(&entry.body),
            cached_at: entry
                .cached_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    fn into_entry(self) -> Option<CachedEntry> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }

        Some(CachedEntry {
            status: StatusCode::from_u16(self.status).ok()?,
            headers,
            body: base64::engine::general_purpose::STANDARD
                .decode(&self.body)
                .ok()?,
            url: Url::parse(&self.url).ok()?,
            cached_at: UNIX_EPOCH + Duration::from_secs(self.cached_at),
        })
    }
}

/// One generation: hot entries in memory, all entries on disk
struct Generation {
    hot: Cache<String, Arc<CachedEntry>>,
    /// Entry directory, `None` for a memory-only store
    dir: Option<PathBuf>,
}

/// All cache generations known to the host
pub struct CacheStorage {
    /// Directory holding one subdirectory per generation
    root: Option<PathBuf>,
    /// Open generations by name
    generations: RwLock<HashMap<String, Generation>>,
    /// Largest body accepted into a generation
    max_entry_bytes: u64,
    /// Body bytes kept in memory per generation before eviction
    max_generation_bytes: u64,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl CacheStorage {
    /// Create a memory-only store with default size limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_ENTRY_BYTES, DEFAULT_MAX_GENERATION_BYTES)
    }

    /// Create a memory-only store with custom size limits
    ///
    /// # Arguments
    /// * `max_entry_bytes` - Largest single body that may be stored
    /// * `max_generation_bytes` - In-memory capacity of each generation
    pub fn with_limits(max_entry_bytes: u64, max_generation_bytes: u64) -> Self {
        Self {
            root: None,
            generations: RwLock::new(HashMap::new()),
            max_entry_bytes,
            max_generation_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a disk-backed store under `root`, reopening generations found there
    pub fn open_dir(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let store = Self {
            root: Some(root),
            ..Self::new()
        };
        for name in store.disk_generations() {
            store.open(&name);
        }

        info!(
            cache_dir = %store.root.as_deref().unwrap_or(Path::new("")).display(),
            generations = store.generations.read().unwrap().len(),
            "Cache storage initialized"
        );
        Ok(store)
    }

    /// Open a generation, creating it if needed
    pub fn open(&self, name: &str) {
        let mut generations = self.generations.write().unwrap();
        if generations.contains_key(name) {
            return;
        }

        let dir = self.root.as_ref().and_then(|root| {
            let dir = root.join(dir_name(name));
            match fs::create_dir_all(&dir) {
                Ok(()) => {
                    cleanup(&dir);
                    Some(dir)
                }
                Err(e) => {
                    warn!(generation = name, error = %e, "Failed to create generation directory, keeping it in memory");
                    None
                }
            }
        });

        let hot = Cache::builder()
            .max_capacity(self.max_generation_bytes)
            .weigher(|_key: &String, entry: &Arc<CachedEntry>| -> u32 {
                entry.body.len().try_into().unwrap_or(u32::MAX)
            })
            .name(name)
            .build();
        generations.insert(name.to_string(), Generation { hot, dir });
        info!(generation = name, "Opened cache generation");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.generations.read().unwrap().contains_key(name)
    }

    /// Names of all generations, open or on disk, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut names: BTreeSet<String> =
            self.generations.read().unwrap().keys().cloned().collect();
        names.extend(self.disk_generations());
        names.into_iter().collect()
    }

    /// Drop a generation and everything in it
    pub fn delete(&self, name: &str) -> bool {
        let removed = self.generations.write().unwrap().remove(name);
        let mut deleted = false;

        if let Some(generation) = &removed {
            generation.hot.invalidate_all();
            deleted = true;
        }
        if let Some(root) = &self.root {
            let dir = root.join(dir_name(name));
            if dir.is_dir() {
                match fs::remove_dir_all(&dir) {
                    Ok(()) => deleted = true,
                    Err(e) => warn!(generation = name, error = %e, "Failed to remove generation directory"),
                }
            }
        }

        if deleted {
            info!(generation = name, "Deleted cache generation");
        }
        deleted
    }

    /// Look up an entry in one generation
    ///
    /// Checks memory first, then disk. Updates hit/miss counters.
    pub fn lookup(&self, generation: &str, key: &str) -> Option<Arc<CachedEntry>> {
        let found = {
            let generations = self.generations.read().unwrap();
            generations.get(generation).and_then(|g| {
                g.hot.get(key).or_else(|| {
                    let entry = Arc::new(read_entry(g.dir.as_deref()?, key)?);
                    g.hot.insert(key.to_string(), Arc::clone(&entry));
                    trace!(generation = generation, key = key, "Loaded entry from disk");
                    Some(entry)
                })
            })
        };

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(generation = generation, key = key, "Cache HIT");
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(generation = generation, key = key, "Cache MISS");
                None
            }
        }
    }

    /// Store an entry in an existing generation, replacing any previous one
    pub fn put(&self, generation: &str, key: &str, entry: CachedEntry) -> Result<(), CacheError> {
        let size = entry.body.len() as u64;
        if size > self.max_entry_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                limit: self.max_entry_bytes,
            });
        }

        let generations = self.generations.read().unwrap();
        let target = generations
            .get(generation)
            .ok_or_else(|| CacheError::GenerationClosed(generation.to_string()))?;
        if let Some(dir) = &target.dir {
            write_entry(dir, key, &entry)?;
        }
        target.hot.insert(key.to_string(), Arc::new(entry));
        debug!(generation = generation, key = key, size = size, "Cached response");
        Ok(())
    }

    /// Number of entries in a generation
    pub fn entry_count(&self, generation: &str) -> u64 {
        match self.generations.read().unwrap().get(generation) {
            Some(Generation { dir: Some(dir), .. }) => entry_files(dir).count() as u64,
            Some(Generation { hot, dir: None }) => {
                hot.run_pending_tasks();
                hot.entry_count()
            }
            None => 0,
        }
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Generation names that have a directory under the root
    fn disk_generations(&self) -> Vec<String> {
        let Some(root) = &self.root else {
            return Vec::new();
        };
        let Ok(read_dir) = fs::read_dir(root) else {
            return Vec::new();
        };

        read_dir
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let raw = entry.file_name();
                let raw = raw.to_str()?;
                urlencoding::decode(raw).ok().map(|name| name.into_owned())
            })
            .collect()
    }
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory name for a generation (build ids may contain any character)
fn dir_name(generation: &str) -> String {
    urlencoding::encode(generation).into_owned()
}

/// Entry file for a cache key
fn entry_path(dir: &Path, key: &str) -> PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    dir.join(format!("{:x}.{}", hasher.finalize(), ENTRY_EXTENSION))
}

fn entry_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
}

fn read_entry(dir: &Path, key: &str) -> Option<CachedEntry> {
    let path = entry_path(dir, key);
    let data = fs::read(&path).ok()?;
    let stored: StoredEntry = match serde_json::from_slice(&data) {
        Ok(stored) => stored,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt cache entry, removing");
            let _ = fs::remove_file(&path);
            return None;
        }
    };
    if stored.key != key {
        return None;
    }
    stored.into_entry()
}

fn write_entry(dir: &Path, key: &str, entry: &CachedEntry) -> Result<(), CacheError> {
    let json = serde_json::to_vec(&StoredEntry::new(key, entry))?;

    // Write atomically using tempfile
    let mut tmp = tempfile::Builder::new()
        .suffix(&format!(".{}", TEMP_EXTENSION))
        .tempfile_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(entry_path(dir, key))
        .map_err(|e| CacheError::Io(e.error))?;
    Ok(())
}

/// Remove temp files left by interrupted writes
fn cleanup(dir: &Path) {
    if let Ok(read_dir) = fs::read_dir(dir) {
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
                debug!(path = %path.display(), "Removing stale temp file");
                let _ = fs::remove_file(&path);
            }
        }
    }
}

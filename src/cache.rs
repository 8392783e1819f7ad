//! Persistent prompt -> completion cache.
//!
//! The on-disk format is a single JSON object mapping exact cache keys to
//! generated text. It is read once when the cache is opened and rewritten in
//! full on every flush.

use crate::error::CacheError;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Store of previously paid-for generations
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Insert unless the key is already present. Returns the value now stored
    /// under the key, which is the first one ever written.
    fn put(&self, key: String, value: String) -> String;

    /// Durably persist the current contents
    fn flush(&self) -> Result<(), CacheError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local cache with nothing behind it
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        read_entries(&self.entries).get(key).cloned()
    }

    fn put(&self, key: String, value: String) -> String {
        insert_first(&self.entries, key, value)
    }

    fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn len(&self) -> usize {
        read_entries(&self.entries).len()
    }
}

/// Cache backed by a JSON file, replaced atomically on each flush
pub struct JsonFileCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
    /// Serializes flushes so snapshots never race each other on disk
    persist_lock: Mutex<()>,
}

impl JsonFileCache {
    /// Open the cache at `path`. A missing file starts empty; an unreadable
    /// or undecodable one also starts empty, with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        info!("Loaded {} cached responses from {}", entries.len(), path.display());
        Self {
            path,
            entries: RwLock::new(entries),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl ResponseCache for JsonFileCache {
    fn get(&self, key: &str) -> Option<String> {
        read_entries(&self.entries).get(key).cloned()
    }

    fn put(&self, key: String, value: String) -> String {
        insert_first(&self.entries, key, value)
    }

    fn flush(&self) -> Result<(), CacheError> {
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());

        // Snapshot under the writer lock so the newest state always lands last
        let bytes = serde_json::to_vec(&*read_entries(&self.entries))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&bytes).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        debug!("Flushed {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }

    fn len(&self) -> usize {
        read_entries(&self.entries).len()
    }
}

fn load_entries(path: &Path) -> HashMap<String, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No cache file at {}, starting empty", path.display());
            return HashMap::new();
        }
        Err(e) => {
            warn!("Could not read cache file {}: {}; starting empty", path.display(), e);
            return HashMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not decode cache file {}: {}; starting empty", path.display(), e);
            HashMap::new()
        }
    }
}

fn read_entries(
    entries: &RwLock<HashMap<String, String>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
    entries.read().unwrap_or_else(|e| e.into_inner())
}

fn insert_first(entries: &RwLock<HashMap<String, String>>, key: String, value: String) -> String {
    let mut entries = entries.write().unwrap_or_else(|e| e.into_inner());
    entries.entry(key).or_insert(value).clone()
}

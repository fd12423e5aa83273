//! Durable key-value stores backing the statistics cache
//!
//! `FileStore` persists each key as a JSON file in an XDG-compliant cache
//! directory (`~/.cache/koistats/` on Linux). `MemoryStore` keeps values in
//! process memory and is meant for tests and embedding.

use directories::ProjectDirs;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised by a store or while decoding what it holds
///
/// The statistics cache recovers from all of these locally.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing medium could not be read or written
    #[error("cache I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored value could not be deserialized
    #[error("cache entry '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be serialized for storage
    #[error("failed to encode cache entry '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// No durable medium exists in this environment
    #[error("cache storage is unavailable")]
    Unavailable,
}

/// A durable key-value store with atomic per-key reads and writes
pub trait KeyValueStore: Send + Sync {
    /// Whether a durable medium exists in this environment
    fn is_available(&self) -> bool;

    /// Reads the raw value under `key`, `Ok(None)` if absent
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Replaces the value under `key`
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removes `key`; removing a missing key succeeds
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Stores values as `<key>.json` files in a cache directory
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where cache files are stored, `None` when no home directory exists
    cache_dir: Option<PathBuf>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    /// Creates a store in the XDG-compliant cache directory
    ///
    /// If the directory cannot be determined (e.g. no home directory) the
    /// store reports itself unavailable instead of failing.
    pub fn new() -> Self {
        let cache_dir =
            ProjectDirs::from("", "", "koistats").map(|dirs| dirs.cache_dir().to_path_buf());
        if cache_dir.is_none() {
            tracing::warn!("no cache directory available, statistics will not be persisted");
        }
        Self { cache_dir }
    }

    /// Creates a store with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir: Some(cache_dir),
        }
    }

    /// Returns the cache directory, if any
    pub fn dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    fn cache_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key)))
            .ok_or(CacheError::Unavailable)
    }

    fn io_error(key: &str, source: std::io::Error) -> CacheError {
        CacheError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl KeyValueStore for FileStore {
    fn is_available(&self) -> bool {
        self.cache_dir.is_some()
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.cache_path(key)?;
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let path = self.cache_path(key)?;
        let dir = self.cache_dir.as_deref().ok_or(CacheError::Unavailable)?;
        fs::create_dir_all(dir).map_err(|e| Self::io_error(key, e))?;

        // Each writer gets its own temp file; the rename replaces the entry atomically
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Self::io_error(key, e))?;
        tmp.write_all(value.as_bytes()).map_err(|e| Self::io_error(key, e))?;
        tmp.persist(&path)
            .map(|_| ())
            .map_err(|e| Self::io_error(key, e.error))
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.cache_path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(key, e)),
        }
    }
}

/// Keeps values in process memory
///
/// Does not survive a restart; use `FileStore` for durable caching.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn is_available(&self) -> bool {
        true
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

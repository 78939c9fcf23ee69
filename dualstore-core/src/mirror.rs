//! Local mirror: the full record collection persisted as one JSON array
//! under a single key of a durable key-value store.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::record::Record;

/// Key the mirror blob is stored under unless configured otherwise.
pub const DEFAULT_MIRROR_KEY: &str = "dualstore_data";

/// Errors that can occur while writing the mirror.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("I/O error for {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Durable string storage addressed by key.
pub trait KeyValueStore: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, MirrorError>;
    fn set(&self, key: &str, value: &str) -> Result<(), MirrorError>;
    fn remove(&self, key: &str) -> Result<(), MirrorError>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rejects keys that could escape the storage directory.
    fn path_for(&self, key: &str) -> Result<PathBuf, MirrorError> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
            || key.starts_with('.')
        {
            return Err(MirrorError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, MirrorError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirrorError::Io(path, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MirrorError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| MirrorError::Io(self.dir.clone(), e))?;

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("json.tmp");
        let mut file =
            File::create(&temp_path).map_err(|e| MirrorError::Io(temp_path.clone(), e))?;
        file.write_all(value.as_bytes())
            .map_err(|e| MirrorError::Io(temp_path.clone(), e))?;
        file.sync_all()
            .map_err(|e| MirrorError::Io(temp_path.clone(), e))?;
        fs::rename(&temp_path, &path).map_err(|e| MirrorError::Io(path, e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MirrorError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MirrorError::Io(path, e)),
        }
    }
}

/// In-process store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, MirrorError> {
        let entries = self.entries.lock().map_err(|_| MirrorError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MirrorError> {
        let mut entries = self.entries.lock().map_err(|_| MirrorError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MirrorError> {
        let mut entries = self.entries.lock().map_err(|_| MirrorError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// The offline copy of the record collection.
#[derive(Clone)]
pub struct LocalMirror {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl LocalMirror {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Mirror backed by files in `dir`, under the default key.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileStore::new(dir)), DEFAULT_MIRROR_KEY)
    }

    /// Ephemeral mirror, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), DEFAULT_MIRROR_KEY)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the stored collection.
    ///
    /// A missing or blank blob is an empty collection. A corrupt blob is
    /// logged and also treated as empty.
    pub fn load(&self) -> Vec<Record> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Local mirror unreadable, starting empty: {}", e);
                return Vec::new();
            }
        };

        if raw.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Vec<Record>>(&raw) {
            Ok(records) => {
                tracing::debug!("Loaded {} record(s) from local mirror", records.len());
                records
            }
            Err(e) => {
                tracing::warn!("Local mirror '{}' is corrupt, starting empty: {}", self.key, e);
                Vec::new()
            }
        }
    }

    /// Persists the whole collection, replacing the previous snapshot.
    pub fn save(&self, records: &[Record]) -> Result<(), MirrorError> {
        let blob = serde_json::to_string(records)?;
        self.store.set(&self.key, &blob)?;
        tracing::debug!("Saved {} record(s) to local mirror", records.len());
        Ok(())
    }

    /// Returns the raw persisted blob, if any.
    pub fn raw(&self) -> Result<Option<String>, MirrorError> {
        self.store.get(&self.key)
    }

    /// Removes the persisted blob entirely.
    pub fn wipe(&self) -> Result<(), MirrorError> {
        self.store.remove(&self.key)
    }
}

impl std::fmt::Debug for LocalMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMirror").field("key", &self.key).finish()
    }
}

//! Durable key-value storage for the facade's persisted timer snapshot.
//!
//! A small trait so the facade takes its store by injection; the real
//! implementation is one JSON object file in the platform data dir.

use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not determine data directory")]
    NoDataDir,
}

/// Synchronous, local-only key-value storage.
pub trait StateStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// File-backed store: a single JSON object mapping keys to string values.
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open_default() -> Result<Self, StoreError> {
        let proj_dirs =
            ProjectDirs::from("com", "tempo", "tempo").ok_or(StoreError::NoDataDir)?;
        let data_dir = proj_dirs.data_dir();
        fs::create_dir_all(data_dir)?;
        Self::open(data_dir.join("store.json"))
    }

    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let entries = match fs::read_to_string(&path) {
            // An unreadable store file is not fatal; entries get rewritten
            // on the next set.
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    fn flush(&self) -> Result<(), StoreError> {
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        self.flush()
    }
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

#[cfg(test)]
impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// Lets tests hand the same store to two facades in sequence.
#[cfg(test)]
impl<S: StateStore> StateStore for std::sync::Arc<std::sync::Mutex<S>> {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().unwrap().get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock().unwrap().set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.lock().unwrap().remove(key)
    }
}

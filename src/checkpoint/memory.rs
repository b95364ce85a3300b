use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{CheckpointStore, validate_key};
use crate::errors::CheckpointError;
use crate::parser::Record;

/// In-process store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<BTreeMap<String, Record>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    /// The returned path is the key itself.
    fn put(&self, key: &str, content: &Record) -> Result<PathBuf, CheckpointError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        entries.insert(key.to_string(), content.clone());
        Ok(PathBuf::from(key))
    }

    fn get(&self, key: &str) -> Result<Option<Record>, CheckpointError> {
        let entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, CheckpointError> {
        let mut entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CheckpointError> {
        let entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

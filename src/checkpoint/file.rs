use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{CheckpointStore, validate_key};
use crate::errors::CheckpointError;
use crate::parser::Record;

/// Suffix appended to every key to form its file name.
pub const FILE_SUFFIX: &str = "_result.json";

/// One pretty-printed JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{FILE_SUFFIX}"))
    }

    fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write to a sibling temp file, then rename over the target.
fn atomic_write(path: &Path, content: &str) -> Result<(), CheckpointError> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(|e| FileCheckpointStore::io_error(&temp_path, e))?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(FileCheckpointStore::io_error(path, e));
    }
    Ok(())
}

impl CheckpointStore for FileCheckpointStore {
    fn put(&self, key: &str, content: &Record) -> Result<PathBuf, CheckpointError> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;

        let json = serde_json::to_string_pretty(content).map_err(|e| CheckpointError::Serialize {
            key: key.to_string(),
            source: e,
        })?;
        let path = self.path_for(key);
        atomic_write(&path, &json)?;
        Ok(path)
    }

    fn get(&self, key: &str) -> Result<Option<Record>, CheckpointError> {
        validate_key(key)?;
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&path, e)),
        };

        let value: Value = serde_json::from_str(&content)
            .map_err(|e| CheckpointError::Deserialize { path, source: e })?;
        match value {
            Value::Object(map) => Ok(Some(map)),
            _ => Err(CheckpointError::NotAMapping {
                key: key.to_string(),
            }),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, CheckpointError> {
        validate_key(key)?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }

    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CheckpointError> {
        let pattern = format!(
            "{}/{}*{}",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            glob::Pattern::escape(prefix),
            FILE_SUFFIX
        );
        let entries = glob::glob(&pattern).map_err(|_| CheckpointError::InvalidKey {
            key: prefix.to_string(),
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(path = %e.path().display(), "Skipping unreadable checkpoint entry");
                    continue;
                }
            };
            let key = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(FILE_SUFFIX));
            if let Some(key) = key {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("agent_results"));
        let content = record(json!({"test_cases": [{"id": "TC-001", "steps": ["打开页面"]}], "n": 1.5}));

        let path = store.put("writer_improve", &content).unwrap();
        assert_eq!(path, dir.path().join("agent_results/writer_improve_result.json"));
        assert_eq!(store.get("writer_improve").unwrap(), Some(content));
    }

    #[test]
    fn test_put_overwrites_whole_entry() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.put("k", &record(json!({"a": 1, "b": 2}))).unwrap();
        store.put("k", &record(json!({"c": 3}))).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(record(json!({"c": 3}))));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.put("k", &record(json!({"a": 1}))).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["k_result.json"]);
    }

    #[test]
    fn test_get_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("never-created"));
        assert_eq!(store.get("absent").unwrap(), None);
        assert!(store.list_by_prefix("absent").unwrap().is_empty());
    }

    #[test]
    fn test_get_rejects_non_mapping_and_garbage() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        fs::write(store.path_for("list"), "[1, 2]").unwrap();
        fs::write(store.path_for("junk"), "{not json").unwrap();

        assert!(matches!(store.get("list"), Err(CheckpointError::NotAMapping { .. })));
        assert!(matches!(store.get("junk"), Err(CheckpointError::Deserialize { .. })));
        assert_eq!(store.load_checkpoint("junk"), None);
    }

    #[test]
    fn test_delete_reports_existence() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.put("k", &record(json!({}))).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_list_by_prefix_sorted_and_scoped() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        for key in ["w_improve_batch_1", "w_improve_batch_0", "w_improve", "other_batch_0"] {
            store.put(key, &record(json!({"k": key}))).unwrap();
        }
        assert_eq!(
            store.list_by_prefix("w_improve_batch_").unwrap(),
            vec!["w_improve_batch_0", "w_improve_batch_1"]
        );
        assert_eq!(store.list_by_prefix("w_").unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_key_rejected_before_io() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.put("../escape", &record(json!({}))),
            Err(CheckpointError::InvalidKey { .. })
        ));
        assert_eq!(store.save_checkpoint("../escape", &record(json!({}))), None);
    }
}

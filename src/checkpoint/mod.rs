//! Durable key → mapping persistence.
//!
//! Keys are `<owner>_<qualifier>`, where the qualifier is a stage name or
//! `batch_<index>`. Every `put` replaces the whole entry.

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use std::path::PathBuf;
use tracing::{debug, warn};

use crate::errors::CheckpointError;
use crate::parser::Record;

/// Build a checkpoint key from an owner and a qualifier.
pub fn checkpoint_key(owner: &str, qualifier: &str) -> String {
    format!("{owner}_{qualifier}")
}

/// Reject keys that could escape the store or confuse prefix listing.
pub fn validate_key(key: &str) -> Result<(), CheckpointError> {
    let bad = key.trim().is_empty()
        || key.contains(['/', '\\', '\0', '*', '?', '[', ']'])
        || key.contains("..");
    if bad {
        return Err(CheckpointError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Key-value store for checkpoint entries.
///
/// `put`/`get`/`delete`/`list_by_prefix` report errors; the provided
/// `load_checkpoint`/`save_checkpoint` log them and degrade instead, which is
/// what stage callers and the batch orchestrator use.
pub trait CheckpointStore: Send + Sync {
    /// Store `content` under `key`, replacing any previous entry. Returns the
    /// location written.
    fn put(&self, key: &str, content: &Record) -> Result<PathBuf, CheckpointError>;

    fn get(&self, key: &str) -> Result<Option<Record>, CheckpointError>;

    /// Remove an entry. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, CheckpointError>;

    /// All keys starting with `prefix`, sorted.
    fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, CheckpointError>;

    /// Load an entry; read or parse failures are logged and reported as absent.
    fn load_checkpoint(&self, key: &str) -> Option<Record> {
        match self.get(key) {
            Ok(Some(record)) => {
                debug!(key, "Loaded checkpoint");
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to load checkpoint; treating as absent");
                None
            }
        }
    }

    /// Save an entry; failures are logged and yield `None`.
    fn save_checkpoint(&self, key: &str, content: &Record) -> Option<PathBuf> {
        match self.put(key, content) {
            Ok(path) => {
                debug!(key, path = %path.display(), "Saved checkpoint");
                Some(path)
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to save checkpoint; continuing without it");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(checkpoint_key("test_case_writer", "improve"), "test_case_writer_improve");
        assert_eq!(
            checkpoint_key("test_case_writer_improve", "batch_3"),
            "test_case_writer_improve_batch_3"
        );
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("writer_batch_0").is_ok());
        assert!(validate_key("需求分析").is_ok());
        for bad in ["", "  ", "../etc", "a/b", "a\\b", "a*", "a?b", "[x]"] {
            assert!(
                matches!(validate_key(bad), Err(CheckpointError::InvalidKey { .. })),
                "{bad:?} should be rejected"
            );
        }
    }
}

//! Typed error hierarchy for caseforge.
//!
//! Four enums cover the subsystems that can fail:
//! - `CheckpointError`: checkpoint store I/O and (de)serialization
//! - `ModelError`: external model round-trips
//! - `BatchError`: per-batch worker failures (logged, never returned from a run)
//! - `StageError`: stage callers that could not produce valid records

use thiserror::Error;

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize checkpoint '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse checkpoint file {path}: {source}")]
    Deserialize {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint '{key}' does not contain a JSON object")]
    NotAMapping { key: String },

    #[error("Invalid checkpoint key '{key}'")]
    InvalidKey { key: String },

    #[error("Checkpoint store lock poisoned")]
    LockPoisoned,
}

/// Errors from a model round-trip.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to spawn model command '{cmd}': {source}")]
    SpawnFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Model command exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Model I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single batch fell back to its original items.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch {index} worker failed: {message}")]
    WorkerFailed { index: usize, message: String },

    #[error("Batch {index} timed out after {secs}s")]
    TimedOut { index: usize, secs: u64 },

    #[error("Batch {index} worker panicked")]
    Panicked { index: usize },
}

impl BatchError {
    /// Index of the batch that failed.
    pub fn index(&self) -> usize {
        match self {
            BatchError::WorkerFailed { index, .. }
            | BatchError::TimedOut { index, .. }
            | BatchError::Panicked { index } => *index,
        }
    }
}

/// Errors from a pipeline stage caller.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("No valid records after {attempts} attempts")]
    NoValidRecords { attempts: u32 },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_error_io_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/results/writer_result.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CheckpointError::Io {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            CheckpointError::Io { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io"),
        }
        assert!(err.to_string().contains("writer_result.json"));
    }

    #[test]
    fn model_error_timeout_mentions_seconds() {
        let err = ModelError::Timeout { secs: 30 };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn batch_error_reports_index() {
        assert_eq!(BatchError::Panicked { index: 4 }.index(), 4);
        assert_eq!(BatchError::TimedOut { index: 1, secs: 5 }.index(), 1);
        let err = BatchError::WorkerFailed {
            index: 2,
            message: "model unavailable".into(),
        };
        assert_eq!(err.index(), 2);
        assert!(err.to_string().contains("model unavailable"));
    }

    #[test]
    fn stage_error_converts_from_model_error() {
        let stage_err: StageError = ModelError::EmptyResponse.into();
        assert!(matches!(stage_err, StageError::Model(ModelError::EmptyResponse)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CheckpointError::LockPoisoned);
        assert_std_error(&ModelError::EmptyResponse);
        assert_std_error(&BatchError::Panicked { index: 0 });
        assert_std_error(&StageError::NoValidRecords { attempts: 3 });
    }
}

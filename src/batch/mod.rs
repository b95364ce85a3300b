//! Batch orchestration: partition, run with bounded concurrency, checkpoint
//! each batch, merge in order.

pub mod orchestrator;
pub mod plan;
pub mod state;

pub use orchestrator::{
    BatchConfig, BatchOrchestrator, BatchWorker, DEFAULT_PAYLOAD_KEY, FnWorker, batch_key,
    worker_fn,
};
pub use plan::{BatchPlan, SEQUENTIAL_CHUNK_DIVISOR};
pub use state::{BatchOutcome, BatchRun, BatchStatus, BatchSummary};

use serde::{Deserialize, Serialize};

/// Events emitted during a run for progress display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Work was partitioned.
    Planned {
        prefix: String,
        items: usize,
        batches: usize,
        batch_size: usize,
        concurrency: usize,
    },
    /// A batch was handed to its worker.
    Started { index: usize, size: usize },
    /// A batch finished, successfully or not.
    Completed {
        index: usize,
        status: BatchStatus,
        items: usize,
    },
    /// A batch failed and its original items were kept.
    FellBack { index: usize, reason: String },
    /// All batches were merged and the stage checkpoint written.
    Merged {
        prefix: String,
        items: usize,
        batches: usize,
    },
    /// A stage checkpoint was reused instead of running.
    Resumed { prefix: String, items: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = BatchEvent::FellBack {
            index: 2,
            reason: "Batch 2 timed out after 600s".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "fell_back");
        assert_eq!(json["index"], 2);

        let back: BatchEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, BatchEvent::FellBack { index: 2, .. }));
    }
}

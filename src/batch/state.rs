//! Per-batch outcomes and run summaries.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The worker returned transformed items.
    Completed,
    /// The worker failed, timed out or panicked; original items were kept.
    FellBack,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "completed",
            BatchStatus::FellBack => "fell_back",
        }
    }
}

/// Result record for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub index: usize,
    pub status: BatchStatus,
    /// Items in the input batch
    pub input_items: usize,
    /// Items carried into the merge
    pub output_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: String,
    pub prefix: String,
    pub total_items: usize,
    pub total_batches: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub completed: usize,
    pub fell_back: usize,
    /// Outcomes in batch-index order
    #[serde(default)]
    pub outcomes: Vec<BatchOutcome>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl BatchSummary {
    pub fn add_outcome(&mut self, outcome: BatchOutcome) {
        match outcome.status {
            BatchStatus::Completed => self.completed += 1,
            BatchStatus::FellBack => self.fell_back += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn all_completed(&self) -> bool {
        self.fell_back == 0 && self.completed == self.total_batches
    }

    /// Items produced by the merge.
    pub fn merged_items(&self) -> usize {
        self.outcomes.iter().map(|o| o.output_items).sum()
    }
}

/// Everything a run hands back to its caller.
#[derive(Debug, Clone)]
pub struct BatchRun<T> {
    pub items: Vec<T>,
    pub summary: BatchSummary,
    /// Whether the result came from an existing stage checkpoint.
    pub resumed: bool,
}

impl<T> BatchRun<T> {
    pub fn empty(prefix: &str, run_id: String) -> Self {
        Self {
            items: Vec::new(),
            summary: BatchSummary {
                run_id,
                prefix: prefix.to_string(),
                ..Default::default()
            },
            resumed: false,
        }
    }
}

pub struct RunTimer {
    start: Instant,
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, status: BatchStatus, items: usize) -> BatchOutcome {
        BatchOutcome {
            index,
            status,
            input_items: items,
            output_items: items,
            error: None,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = BatchSummary {
            total_batches: 3,
            ..Default::default()
        };
        summary.add_outcome(outcome(0, BatchStatus::Completed, 2));
        summary.add_outcome(outcome(1, BatchStatus::FellBack, 2));
        summary.add_outcome(outcome(2, BatchStatus::Completed, 1));

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.fell_back, 1);
        assert_eq!(summary.merged_items(), 5);
        assert!(!summary.all_completed());
    }

    #[test]
    fn test_outcome_serializes_duration_as_millis() {
        let json = serde_json::to_value(outcome(0, BatchStatus::FellBack, 1)).unwrap();
        assert_eq!(json["duration"], 5);
        assert_eq!(json["status"], "fell_back");
        assert!(json.get("error").is_none());
    }
}

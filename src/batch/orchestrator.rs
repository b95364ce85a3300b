//! Bounded-concurrency batch runner with per-batch checkpoints.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use super::BatchEvent;
use super::plan::{BatchPlan, SEQUENTIAL_CHUNK_DIVISOR};
use super::state::{BatchOutcome, BatchRun, BatchStatus, BatchSummary, RunTimer};
use crate::checkpoint::{CheckpointStore, checkpoint_key};
use crate::errors::BatchError;
use crate::parser::Record;

/// Default key under which batch and stage checkpoints store their items.
pub const DEFAULT_PAYLOAD_KEY: &str = "items";

/// Transforms one batch of items.
#[async_trait]
pub trait BatchWorker<T>: Send + Sync {
    async fn process(&self, index: usize, batch: Vec<T>) -> anyhow::Result<Vec<T>>;
}

/// Adapter turning an async closure into a [`BatchWorker`].
pub struct FnWorker<F>(F);

pub fn worker_fn<T, F, Fut>(f: F) -> FnWorker<F>
where
    F: Fn(usize, Vec<T>) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<T>>>,
{
    FnWorker(f)
}

#[async_trait]
impl<T, F, Fut> BatchWorker<T> for FnWorker<F>
where
    T: Send + 'static,
    F: Fn(usize, Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send,
{
    async fn process(&self, index: usize, batch: Vec<T>) -> anyhow::Result<Vec<T>> {
        (self.0)(index, batch).await
    }
}

/// Orchestrator settings that stay fixed across runs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub sequential_divisor: usize,
    /// Per-batch time limit; `None` waits indefinitely.
    pub batch_timeout: Option<Duration>,
    /// Key holding the item list inside checkpoint entries.
    pub payload_key: String,
    /// Extra fields copied into every batch and stage checkpoint.
    pub checkpoint_extras: Record,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            sequential_divisor: SEQUENTIAL_CHUNK_DIVISOR,
            batch_timeout: None,
            payload_key: DEFAULT_PAYLOAD_KEY.to_string(),
            checkpoint_extras: Record::new(),
        }
    }
}

impl BatchConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_payload_key(mut self, key: impl Into<String>) -> Self {
        self.payload_key = key.into();
        self
    }

    pub fn with_sequential_divisor(mut self, divisor: usize) -> Self {
        self.sequential_divisor = divisor.max(1);
        self
    }

    pub fn with_checkpoint_extras(mut self, extras: Record) -> Self {
        self.checkpoint_extras = extras;
        self
    }
}

/// Partitions work, runs batches with bounded concurrency, checkpoints each
/// batch and merges results in batch-index order.
///
/// A failing batch never fails the run: its original items are merged in
/// its place. Concurrency is a parameter of each call, so one orchestrator
/// can serve stages with different worker budgets.
#[derive(Clone)]
pub struct BatchOrchestrator {
    store: Arc<dyn CheckpointStore>,
    config: BatchConfig,
    event_tx: Option<mpsc::Sender<BatchEvent>>,
}

impl BatchOrchestrator {
    pub fn new(store: Arc<dyn CheckpointStore>, config: BatchConfig) -> Self {
        Self {
            store,
            config,
            event_tx: None,
        }
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<BatchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    async fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run `worker` over `items` and return the merged result.
    pub async fn run<T, W>(
        &self,
        items: Vec<T>,
        worker: Arc<W>,
        concurrency: usize,
        checkpoint_prefix: &str,
    ) -> Vec<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        W: BatchWorker<T> + ?Sized + 'static,
    {
        self.execute(items, worker, concurrency, checkpoint_prefix)
            .await
            .items
    }

    /// Like [`run`](Self::run), but reuses a completed stage checkpoint under
    /// `checkpoint_prefix` unless `force` is set.
    pub async fn run_resumable<T, W>(
        &self,
        items: Vec<T>,
        worker: Arc<W>,
        concurrency: usize,
        checkpoint_prefix: &str,
        force: bool,
    ) -> BatchRun<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        W: BatchWorker<T> + ?Sized + 'static,
    {
        if !force && let Some(cached) = self.load_stage::<T>(checkpoint_prefix) {
            info!(
                prefix = checkpoint_prefix,
                items = cached.len(),
                "Stage checkpoint found; skipping run"
            );
            self.emit(BatchEvent::Resumed {
                prefix: checkpoint_prefix.to_string(),
                items: cached.len(),
            })
            .await;
            let mut run = BatchRun::empty(checkpoint_prefix, uuid::Uuid::new_v4().to_string());
            run.summary.total_items = cached.len();
            run.items = cached;
            run.resumed = true;
            return run;
        }
        self.execute(items, worker, concurrency, checkpoint_prefix).await
    }

    /// Items of a stage checkpoint, if present and readable as `Vec<T>`.
    pub fn load_stage<T: DeserializeOwned>(&self, checkpoint_prefix: &str) -> Option<Vec<T>> {
        let record = self.store.load_checkpoint(checkpoint_prefix)?;
        let payload = record.get(&self.config.payload_key)?.clone();
        match serde_json::from_value(payload) {
            Ok(items) => Some(items),
            Err(e) => {
                warn!(
                    prefix = checkpoint_prefix,
                    error = %e,
                    "Stage checkpoint payload has an unexpected shape; ignoring it"
                );
                None
            }
        }
    }

    /// Full run returning merged items plus a summary.
    pub async fn execute<T, W>(
        &self,
        items: Vec<T>,
        worker: Arc<W>,
        concurrency: usize,
        checkpoint_prefix: &str,
    ) -> BatchRun<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        W: BatchWorker<T> + ?Sized + 'static,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        if items.is_empty() {
            warn!(prefix = checkpoint_prefix, "No items to process");
            return BatchRun::empty(checkpoint_prefix, run_id);
        }

        let timer = RunTimer::start();
        let plan = BatchPlan::new(items.len(), concurrency, self.config.sequential_divisor);
        let total = plan.len();
        info!(
            prefix = checkpoint_prefix,
            %run_id,
            items = items.len(),
            batches = total,
            batch_size = plan.batch_size,
            concurrency = plan.concurrency,
            "Starting batch run"
        );
        self.emit(BatchEvent::Planned {
            prefix: checkpoint_prefix.to_string(),
            items: items.len(),
            batches: total,
            batch_size: plan.batch_size,
            concurrency: plan.concurrency,
        })
        .await;

        let batches = plan.split(&items);
        let mut results: Vec<(Vec<T>, BatchOutcome)> = Vec::with_capacity(total);

        if plan.is_sequential() {
            for (index, batch) in batches.into_iter().enumerate() {
                results.push(
                    self.process_batch(index, total, batch, worker.clone(), checkpoint_prefix)
                        .await,
                );
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(plan.concurrency));
            let handles: Vec<_> = batches
                .into_iter()
                .enumerate()
                .map(|(index, batch)| {
                    let this = self.clone();
                    let semaphore = semaphore.clone();
                    let worker = worker.clone();
                    let prefix = checkpoint_prefix.to_string();
                    tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        this.process_batch(index, total, batch, worker, &prefix).await
                    })
                })
                .collect();

            for (index, joined) in join_all(handles).await.into_iter().enumerate() {
                match joined {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        error!(batch = index, error = %e, "Batch task aborted; keeping original items");
                        let original = items[plan.ranges[index].clone()].to_vec();
                        let outcome = BatchOutcome {
                            index,
                            status: BatchStatus::FellBack,
                            input_items: original.len(),
                            output_items: original.len(),
                            error: Some(BatchError::Panicked { index }.to_string()),
                            duration: Duration::ZERO,
                        };
                        results.push((original, outcome));
                    }
                }
            }
        }

        results.sort_by_key(|(_, outcome)| outcome.index);

        let mut summary = BatchSummary {
            run_id: run_id.clone(),
            prefix: checkpoint_prefix.to_string(),
            total_items: items.len(),
            total_batches: total,
            batch_size: plan.batch_size,
            concurrency: plan.concurrency,
            ..Default::default()
        };
        let mut merged = Vec::with_capacity(items.len());
        for (batch_items, outcome) in results {
            merged.extend(batch_items);
            summary.add_outcome(outcome);
        }
        summary.duration = timer.elapsed();

        self.persist_stage(checkpoint_prefix, &merged, &summary).await;

        info!(
            prefix = checkpoint_prefix,
            %run_id,
            items = merged.len(),
            completed = summary.completed,
            fell_back = summary.fell_back,
            "Batch run finished"
        );
        BatchRun {
            items: merged,
            summary,
            resumed: false,
        }
    }

    async fn process_batch<T, W>(
        &self,
        index: usize,
        total: usize,
        batch: Vec<T>,
        worker: Arc<W>,
        prefix: &str,
    ) -> (Vec<T>, BatchOutcome)
    where
        T: Serialize + Clone + Send + Sync + 'static,
        W: BatchWorker<T> + ?Sized + 'static,
    {
        let started = Instant::now();
        let input_items = batch.len();
        debug!(batch = index, size = input_items, "Processing batch");
        self.emit(BatchEvent::Started {
            index,
            size: input_items,
        })
        .await;

        let original = batch.clone();
        let work = AssertUnwindSafe(worker.process(index, batch)).catch_unwind();
        let result = match self.config.batch_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(joined) => flatten(index, joined),
                Err(_) => Err(BatchError::TimedOut {
                    index,
                    secs: limit.as_secs(),
                }),
            },
            None => flatten(index, work.await),
        };

        let (items, status, error) = match result {
            Ok(items) => (items, BatchStatus::Completed, None),
            Err(e) => {
                warn!(batch = index, error = %e, "Batch failed; keeping original items");
                self.emit(BatchEvent::FellBack {
                    index,
                    reason: e.to_string(),
                })
                .await;
                (original, BatchStatus::FellBack, Some(e.to_string()))
            }
        };

        self.persist_batch(prefix, index, total, &items, status);

        let outcome = BatchOutcome {
            index,
            status,
            input_items,
            output_items: items.len(),
            error,
            duration: started.elapsed(),
        };
        self.emit(BatchEvent::Completed {
            index,
            status,
            items: items.len(),
        })
        .await;
        (items, outcome)
    }

    fn checkpoint_content<T: Serialize>(&self, items: &[T]) -> Option<Record> {
        let payload = match serde_json::to_value(items) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Items are not serializable; skipping checkpoint");
                return None;
            }
        };
        let mut content = self.config.checkpoint_extras.clone();
        content.insert(self.config.payload_key.clone(), payload);
        Some(content)
    }

    fn persist_batch<T: Serialize>(
        &self,
        prefix: &str,
        index: usize,
        total: usize,
        items: &[T],
        status: BatchStatus,
    ) {
        let Some(mut content) = self.checkpoint_content(items) else {
            return;
        };
        content.insert("batch_index".into(), json!(index));
        content.insert("batch_progress".into(), json!(format!("{}/{}", index + 1, total)));
        content.insert("status".into(), json!(status.as_str()));
        content.insert("saved_at".into(), json!(Utc::now().to_rfc3339()));

        let key = batch_key(prefix, index);
        self.store.save_checkpoint(&key, &content);
    }

    async fn persist_stage<T: Serialize>(&self, prefix: &str, items: &[T], summary: &BatchSummary) {
        let Some(mut content) = self.checkpoint_content(items) else {
            return;
        };
        content.insert("status".into(), json!("completed"));
        content.insert("batch_count".into(), json!(summary.total_batches));
        content.insert("item_count".into(), json!(items.len()));
        content.insert("fell_back".into(), json!(summary.fell_back));
        content.insert("run_id".into(), Value::String(summary.run_id.clone()));
        content.insert("completed_at".into(), json!(Utc::now().to_rfc3339()));

        if self.store.save_checkpoint(prefix, &content).is_none() {
            warn!(prefix, "Stage checkpoint not saved; keeping batch checkpoints");
            return;
        }
        self.emit(BatchEvent::Merged {
            prefix: prefix.to_string(),
            items: items.len(),
            batches: summary.total_batches,
        })
        .await;
        self.cleanup_batches(prefix);
    }

    /// Delete every `<prefix>_batch_*` entry. Failures are logged only.
    pub fn cleanup_batches(&self, prefix: &str) -> usize {
        let batch_prefix = checkpoint_key(prefix, "batch_");
        let keys = match self.store.list_by_prefix(&batch_prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix, error = %e, "Could not list batch checkpoints for cleanup");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match self.store.delete(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(%key, error = %e, "Failed to delete batch checkpoint"),
            }
        }
        debug!(prefix, removed, "Cleaned up batch checkpoints");
        removed
    }
}

/// Key of the checkpoint for batch `index` under `prefix`.
pub fn batch_key(prefix: &str, index: usize) -> String {
    checkpoint_key(prefix, &format!("batch_{index}"))
}

fn flatten<T>(
    index: usize,
    joined: Result<anyhow::Result<Vec<T>>, Box<dyn std::any::Any + Send>>,
) -> Result<Vec<T>, BatchError> {
    match joined {
        Ok(Ok(items)) => Ok(items),
        Ok(Err(e)) => Err(BatchError::WorkerFailed {
            index,
            message: format!("{e:#}"),
        }),
        Err(_) => Err(BatchError::Panicked { index }),
    }
}

//! CLI command implementations.
//!
//! | Module       | Commands handled |
//! |--------------|------------------|
//! | `parse`      | `Parse`          |
//! | `generate`   | `Generate`       |
//! | `improve`    | `Improve`        |
//! | `stage`      | `Stage`          |
//! | `checkpoint` | `Checkpoint`     |
//! | `config`     | `Config`         |

pub mod checkpoint;
pub mod config;
pub mod generate;
pub mod improve;
pub mod parse;
pub mod stage;

pub use checkpoint::cmd_checkpoint;
pub use config::cmd_config;
pub use generate::cmd_generate;
pub use improve::cmd_improve;
pub use parse::cmd_parse;
pub use stage::cmd_stage;

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use caseforge::batch::{BatchEvent, BatchOrchestrator};
use caseforge::checkpoint::FileCheckpointStore;
use caseforge::config::CaseforgeConfig;
use caseforge::model::CommandModel;
use caseforge::stage::StageRunner;
use tokio::sync::mpsc;

/// Read a file, or stdin when `path` is `None` or `-`.
pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

pub fn checkpoint_store(config: &CaseforgeConfig) -> Arc<FileCheckpointStore> {
    Arc::new(FileCheckpointStore::new(config.output_dir()))
}

/// Stage runner wired to the configured model and checkpoint directory.
pub fn stage_runner(
    config: &CaseforgeConfig,
    event_tx: Option<mpsc::Sender<BatchEvent>>,
) -> StageRunner {
    let store = checkpoint_store(config);
    let mut orchestrator = BatchOrchestrator::new(store.clone(), config.batch_config());
    if let Some(tx) = event_tx {
        orchestrator = orchestrator.with_event_channel(tx);
    }
    let model = CommandModel::from_config(config.model()).with_working_dir(&config.project_dir);

    StageRunner::new(Arc::new(model), store, orchestrator)
        .with_writer_owner(config.owner())
        .with_max_retries(config.model().max_retries)
}

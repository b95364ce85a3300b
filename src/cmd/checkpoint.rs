//! Checkpoint inspection commands: `caseforge checkpoint`.

use anyhow::{Result, bail};
use console::style;

use caseforge::checkpoint::CheckpointStore;
use caseforge::config::CaseforgeConfig;

use super::super::CheckpointCommands;

pub fn cmd_checkpoint(config: &CaseforgeConfig, command: CheckpointCommands) -> Result<()> {
    let store = super::checkpoint_store(config);

    match command {
        CheckpointCommands::List { prefix } => {
            let keys = store.list_by_prefix(prefix.as_deref().unwrap_or(""))?;
            if keys.is_empty() {
                eprintln!("No checkpoints in {}", store.dir().display());
            }
            for key in keys {
                println!("{}", key);
            }
        }
        CheckpointCommands::Show { key } => match store.get(&key)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => bail!("No checkpoint named '{}'", key),
        },
        CheckpointCommands::Clear { prefix, all } => {
            let prefix = match (prefix, all) {
                (Some(prefix), _) => prefix,
                (None, true) => String::new(),
                (None, false) => bail!("Pass a key prefix or --all"),
            };
            let mut removed = 0;
            for key in store.list_by_prefix(&prefix)? {
                if store.delete(&key)? {
                    removed += 1;
                }
            }
            eprintln!("Removed {} checkpoint(s)", style(removed).bold());
        }
    }

    Ok(())
}

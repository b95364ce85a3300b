//! Configuration view and validation commands: `caseforge config`.

use anyhow::{Context, Result};

use caseforge::config::{CaseforgeConfig, CaseforgeToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &CaseforgeConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Caseforge Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No caseforge.toml found at {}", config_path.display());
                println!("Run 'caseforge config init' to create one.");
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!();
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();
            println!("Checkpoint directory: {}", config.output_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("caseforge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.config_dir).with_context(|| {
                format!("Failed to create {}", config.config_dir.display())
            })?;
            CaseforgeToml::default().save(&config_path)?;

            println!("Created caseforge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [model] cmd, args, timeout_secs, max_retries");
            println!("  - [batch] workers, batch_timeout_secs");
            println!("  - [checkpoint] output_dir, owner");
            println!();
        }
    }

    Ok(())
}

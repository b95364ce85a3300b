use anyhow::{Context, Result};
use caseforge::config::CaseforgeConfig;
use caseforge::parser::ParseContext;
use caseforge::stage::Stage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

mod cmd;

#[derive(Parser)]
#[command(name = "caseforge")]
#[command(version, about = "Recover structured model output and run it through batched, checkpointed stages")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Concurrent batch workers. Overrides caseforge.toml and CASEFORGE_WORKERS.
    #[arg(short = 'w', long, global = true)]
    pub workers: Option<usize>,

    /// Checkpoint directory. Overrides caseforge.toml and CASEFORGE_OUTPUT_DIR.
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recover a JSON object from free-form model output
    Parse {
        /// File to read (stdin if omitted or "-")
        input: Option<PathBuf>,

        /// Parse context: selects the strategy chain
        #[arg(short, long, default_value = "general")]
        context: ParseContext,

        /// Print the context's default structure instead of failing
        #[arg(long)]
        or_default: bool,

        /// Print which strategy or retry step recovered the output
        #[arg(long)]
        trace: bool,
    },
    /// Write test cases from a test design, one coverage-matrix feature at a time
    Generate {
        /// Test design: JSON or model output with a coverage_matrix
        design: PathBuf,

        /// Write the test cases here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Ignore existing checkpoints
        #[arg(long)]
        force: bool,

        /// Progress display: full, minimal or json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Improve test cases against review feedback in checkpointed batches
    Improve {
        /// JSON file with a test-case list or {"test_cases": [...]}
        cases: PathBuf,

        /// Review feedback: free text or a JSON review record
        #[arg(short, long)]
        feedback: PathBuf,

        /// Write the improved cases here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Ignore an existing stage checkpoint
        #[arg(long)]
        force: bool,

        /// Progress display: full, minimal or json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Run a single-shot stage from a prompt file
    Stage {
        /// Stage name, e.g. requirement-analysis, test-design, quality-review
        stage: Stage,

        /// Prompt file (stdin if "-")
        #[arg(short, long)]
        prompt: PathBuf,

        /// Ignore an existing stage checkpoint
        #[arg(long)]
        force: bool,
    },
    /// Inspect or clear checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// List checkpoint keys
    List {
        /// Only keys starting with this prefix
        prefix: Option<String>,
    },
    /// Print one checkpoint
    Show { key: String },
    /// Delete checkpoints
    Clear {
        /// Delete keys starting with this prefix
        prefix: Option<String>,

        /// Delete every checkpoint
        #[arg(long, conflicts_with = "prefix")]
        all: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default caseforge.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = CaseforgeConfig::with_cli_args(
        project_dir,
        cli.verbose,
        cli.workers,
        cli.output_dir.clone(),
    )?;
    let _log_guard =
        caseforge::logging::init(&config.toml.logging, config.log_file().as_deref(), cli.verbose)?;
    for warning in &config.env_warnings {
        warn!("{}", warning);
    }

    match &cli.command {
        Commands::Parse {
            input,
            context,
            or_default,
            trace,
        } => cmd::cmd_parse(input.as_deref(), *context, *or_default, *trace)?,
        Commands::Generate {
            design,
            output,
            force,
            ui,
        } => cmd::cmd_generate(&config, design, output.as_deref(), *force, ui).await?,
        Commands::Improve {
            cases,
            feedback,
            output,
            force,
            ui,
        } => {
            cmd::cmd_improve(&config, cases, feedback, output.as_deref(), *force, ui).await?;
        }
        Commands::Stage {
            stage,
            prompt,
            force,
        } => cmd::cmd_stage(&config, *stage, prompt, *force).await?,
        Commands::Checkpoint { command } => cmd::cmd_checkpoint(&config, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}

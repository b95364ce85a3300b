//! Layered configuration for caseforge.
//!
//! Settings come from `.caseforge/caseforge.toml`, then environment
//! variables (a project `.env` file is loaded first), then CLI flags.
//!
//! ```toml
//! [batch]
//! workers = 3
//! sequential_divisor = 3
//! batch_timeout_secs = 600
//!
//! [checkpoint]
//! output_dir = "agent_results"
//! owner = "test_case_writer"
//!
//! [model]
//! cmd = "claude"
//! args = ["--print"]
//! timeout_secs = 300
//! max_retries = 3
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::BatchConfig;

pub const CONFIG_DIR: &str = ".caseforge";
pub const CONFIG_FILE: &str = "caseforge.toml";

pub const ENV_MODEL_CMD: &str = "CASEFORGE_MODEL_CMD";
pub const ENV_WORKERS: &str = "CASEFORGE_WORKERS";
pub const ENV_OUTPUT_DIR: &str = "CASEFORGE_OUTPUT_DIR";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: text, json", s),
        }
    }
}

/// Batch orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSection {
    /// Concurrent workers; 1 runs batches sequentially
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Chunk divisor used when running sequentially
    #[serde(default = "default_sequential_divisor")]
    pub sequential_divisor: usize,
    /// Per-batch time limit in seconds (0 disables)
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

fn default_workers() -> usize {
    1
}

fn default_sequential_divisor() -> usize {
    crate::batch::SEQUENTIAL_CHUNK_DIVISOR
}

fn default_batch_timeout_secs() -> u64 {
    600
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            sequential_divisor: default_sequential_divisor(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

/// Checkpoint store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSection {
    /// Directory for `<key>_result.json` files, relative to the project
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Owner name prefixed to stage checkpoint keys
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("agent_results")
}

fn default_owner() -> String {
    "test_case_writer".to_string()
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            owner: default_owner(),
        }
    }
}

/// Model command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_cmd")]
    pub cmd: String,
    #[serde(default = "default_model_args")]
    pub args: Vec<String>,
    /// Per-call time limit in seconds
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per batch before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_model_cmd() -> String {
    "claude".to_string()
}

fn default_model_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_model_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cmd: default_model_cmd(),
            args: default_model_args(),
            timeout_secs: default_model_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Optional log file; rotated daily
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Contents of `caseforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseforgeToml {
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl CaseforgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse caseforge.toml")
    }

    /// Load `caseforge.toml` from `config_dir`, or defaults if it is absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize caseforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Returns warnings for values that could not be used.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(cmd) = lookup(ENV_MODEL_CMD).filter(|v| !v.trim().is_empty()) {
            self.model.cmd = cmd;
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            match raw.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => self.batch.workers = workers,
                _ => warnings.push(format!(
                    "Ignoring {}='{}': expected a positive integer",
                    ENV_WORKERS, raw
                )),
            }
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.trim().is_empty()) {
            self.checkpoint.output_dir = PathBuf::from(dir);
        }

        warnings
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.batch.workers == 0 {
            warnings.push("batch.workers is 0; running sequentially".to_string());
        }
        if self.batch.sequential_divisor == 0 {
            warnings.push("batch.sequential_divisor is 0; using 1".to_string());
        }
        if self.model.cmd.trim().is_empty() {
            warnings.push("model.cmd is empty".to_string());
        }
        if self.model.max_retries == 0 {
            warnings.push("model.max_retries is 0; each batch will fall back".to_string());
        }
        if self.model.timeout_secs == 0 {
            warnings.push("model.timeout_secs is 0; every call will time out".to_string());
        }
        if self.checkpoint.owner.trim().is_empty() {
            warnings.push("checkpoint.owner is empty".to_string());
        } else if let Err(e) = crate::checkpoint::validate_key(&self.checkpoint.owner) {
            warnings.push(format!("checkpoint.owner is not usable as a key: {e}"));
        }
        if self
            .logging
            .level
            .parse::<tracing_subscriber::filter::LevelFilter>()
            .is_err()
        {
            warnings.push(format!(
                "Invalid logging.level '{}': expected trace, debug, info, warn, error or off",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Resolved configuration: file, then environment, then CLI flags.
#[derive(Debug, Clone)]
pub struct CaseforgeConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: CaseforgeToml,
    pub verbose: bool,
    /// Warnings collected while applying environment overrides
    pub env_warnings: Vec<String>,
}

impl CaseforgeConfig {
    /// Load configuration for `project_dir`, including `.env` and the process
    /// environment.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        // A missing .env is normal.
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = CaseforgeToml::load_or_default(&config_dir)?;
        let env_warnings = toml.apply_env(|key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
            env_warnings,
        })
    }

    /// Load configuration and apply CLI overrides.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        workers: Option<usize>,
        output_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(workers) = workers {
            config.toml.batch.workers = workers;
        }
        if let Some(dir) = output_dir {
            config.toml.checkpoint.output_dir = dir;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Checkpoint directory, resolved against the project directory.
    pub fn output_dir(&self) -> PathBuf {
        let dir = &self.toml.checkpoint.output_dir;
        if dir.is_absolute() {
            dir.clone()
        } else {
            self.project_dir.join(dir)
        }
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.toml.logging.file.as_ref().map(|file| {
            if file.is_absolute() {
                file.clone()
            } else {
                self.project_dir.join(file)
            }
        })
    }

    pub fn workers(&self) -> usize {
        self.toml.batch.workers.max(1)
    }

    pub fn owner(&self) -> &str {
        &self.toml.checkpoint.owner
    }

    pub fn model(&self) -> &ModelConfig {
        &self.toml.model
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        match self.toml.batch.batch_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Orchestrator settings derived from `[batch]`.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::default()
            .with_sequential_divisor(self.toml.batch.sequential_divisor)
            .with_timeout(self.batch_timeout())
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        warnings
    }
}

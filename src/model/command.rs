use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::ModelClient;
use crate::config::ModelConfig;
use crate::errors::ModelError;

/// Runs a CLI model: the prompt goes to stdin, the response is stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    cmd: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl CommandModel {
    pub fn new(cmd: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            timeout,
            working_dir: None,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.cmd.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ModelClient for CommandModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let mut cmd = Command::new(&self.cmd);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(cmd = %self.cmd, prompt_len = prompt.len(), "Calling model");
        let mut child = cmd.spawn().map_err(|e| ModelError::SpawnFailed {
            cmd: self.cmd.clone(),
            source: e,
        })?;

        // writing the prompt counts against the deadline
        let stdin = child.stdin.take();
        let exchange = async {
            let write = async {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(prompt.as_bytes()).await?;
                }
                Ok::<(), std::io::Error>(())
            };
            tokio::join!(write, child.wait_with_output())
        };

        let (written, output) = match timeout(self.timeout, exchange).await {
            Ok(results) => results,
            Err(_) => {
                return Err(ModelError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(cmd = %self.cmd, "Model closed stdin before reading the whole prompt");
            }
            Err(e) => return Err(e.into()),
        }
        let output = output?;

        if !output.status.success() {
            return Err(ModelError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if stdout.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        debug!(cmd = %self.cmd, response_len = stdout.len(), "Model responded");
        Ok(stdout)
    }

    fn name(&self) -> &str {
        &self.cmd
    }
}

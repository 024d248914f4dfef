use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trendvisor_core::ToolFailure;

/// An external stage tool: turns an input (a goal or a data path) into the
/// location of the stage's output.
#[async_trait]
pub trait StageTool: Send + Sync {
    /// Tool name used in diagnostics.
    fn name(&self) -> &str;

    /// Runs the tool for one task and returns the output location.
    async fn run(&self, input: &str, task_id: &str) -> Result<String, ToolFailure>;
}

/// How to launch a [`CommandTool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Executable to launch.
    pub program: String,
    /// Arguments placed before the input and the task id.
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the tool after this many seconds. No limit when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolConfig {
    /// Runs `program` with no extra arguments and no timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

/// Runs a subprocess as `<program> <args...> <input> <task_id>`.
///
/// Success is exit code 0 with the output path as the last non-empty stdout
/// line. Anything else (non-zero exit, signal, timeout, empty output) is a
/// [`ToolFailure`] carrying the trimmed stderr.
pub struct CommandTool {
    name: String,
    config: ToolConfig,
}

impl CommandTool {
    /// Creates a tool named `name` for diagnostics.
    pub fn new(name: impl Into<String>, config: ToolConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.timeout_secs.map(Duration::from_secs)
    }
}

#[async_trait]
impl StageTool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &str, task_id: &str) -> Result<String, ToolFailure> {
        info!(
            tool = %self.name,
            program = %self.config.program,
            task_id = %task_id,
            "Launching stage tool"
        );

        let mut command = tokio::process::Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(input)
            .arg(task_id)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match self.timeout() {
            Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(tool = %self.name, task_id = %task_id, "Stage tool timed out");
                    return Err(ToolFailure::aborted(
                        &self.name,
                        format!("timed out after {}s", limit.as_secs()),
                    ));
                }
            },
            None => command.output().await,
        }
        .map_err(|e| ToolFailure::aborted(&self.name, format!("failed to launch: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();

        if !output.status.success() {
            let diagnostic = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr.to_string()
            };
            return Err(match output.status.code() {
                Some(code) => ToolFailure::exited(&self.name, code, diagnostic),
                None => ToolFailure::aborted(&self.name, diagnostic),
            });
        }

        match last_line(&stdout) {
            Some(location) => {
                debug!(tool = %self.name, task_id = %task_id, location = %location, "Stage tool finished");
                Ok(location.to_string())
            }
            None => Err(ToolFailure::exited(
                &self.name,
                0,
                "tool produced no output path",
            )),
        }
    }
}

/// Last non-empty line, trimmed.
fn last_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).rfind(|line| !line.is_empty())
}

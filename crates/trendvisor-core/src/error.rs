use thiserror::Error;

use crate::task::TaskStatus;

/// A convenience `Result` alias using [`TrendvisorError`].
pub type TrendvisorResult<T> = Result<T, TrendvisorError>;

/// Failure reported by an external pipeline tool (collection or analysis).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tool} failed (exit code {}): {diagnostic}", exit_label(.exit_code))]
pub struct ToolFailure {
    /// Tool name, as configured.
    pub tool: String,
    /// Process exit code, `None` when the process never exited normally.
    pub exit_code: Option<i32>,
    /// Diagnostic text, usually the trimmed stderr of the tool.
    pub diagnostic: String,
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl ToolFailure {
    /// Creates a failure with an exit code.
    pub fn exited(tool: impl Into<String>, exit_code: i32, diagnostic: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            exit_code: Some(exit_code),
            diagnostic: diagnostic.into(),
        }
    }

    /// Creates a failure that never produced an exit code (spawn error, timeout, panic).
    pub fn aborted(tool: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            exit_code: None,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Top-level error type for the Trendvisor pipeline.
///
/// Each variant corresponds to one class of failure; see the crate docs for
/// which layer handles which class.
#[derive(Debug, Error)]
pub enum TrendvisorError {
    /// A malformed or incomplete event payload, or a record invariant violation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external stage tool failed.
    #[error("Tool failure: {0}")]
    Tool(#[from] ToolFailure),

    /// The state store backend could not be reached at construction time.
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    /// The message bus backend could not be reached at construction time.
    #[error("Message bus unavailable: {0}")]
    BusUnavailable(String),

    /// No record exists for the given task id.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A status change that the pipeline state machine does not allow.
    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose update was rejected.
        task_id: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// An error raised while running an agent (lifecycle misuse, handler fault).
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

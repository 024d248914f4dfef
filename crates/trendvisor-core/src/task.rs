use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TrendvisorError, TrendvisorResult};

/// Artifact key written by the collection stage.
pub const DATA_PATH: &str = "data_path";
/// Artifact key written by the analysis stage.
pub const REPORT_PATH: &str = "report_path";

/// Status of a task in the collect → analyze pipeline.
///
/// ```text
/// CREATED → COLLECTING → COLLECTION_COMPLETE → ANALYZING → ANALYSIS_COMPLETE
///                      ↘ COLLECTION_FAILED               ↘ ANALYSIS_FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Record written by the orchestrator, no stage has started.
    Created,
    /// The collection tool is running.
    Collecting,
    /// Raw data is available at `artifacts.data_path`.
    CollectionComplete,
    /// The collection tool failed. Terminal.
    CollectionFailed,
    /// The analysis tool is running.
    Analyzing,
    /// The report is available at `artifacts.report_path`. Terminal.
    AnalysisComplete,
    /// The analysis tool failed. Terminal.
    AnalysisFailed,
}

impl TaskStatus {
    /// Returns `true` if the pipeline allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Collecting)
                | (Collecting, CollectionComplete)
                | (Collecting, CollectionFailed)
                | (CollectionComplete, Analyzing)
                | (Analyzing, AnalysisComplete)
                | (Analyzing, AnalysisFailed)
        )
    }

    /// Terminal statuses end the task; no stage writes after them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::AnalysisComplete | TaskStatus::CollectionFailed | TaskStatus::AnalysisFailed
        )
    }

    /// Returns `true` for the `*_FAILED` statuses.
    pub fn is_failure(self) -> bool {
        matches!(self, TaskStatus::CollectionFailed | TaskStatus::AnalysisFailed)
    }

    /// Wire name of the status, e.g. `COLLECTION_COMPLETE`.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Collecting => "COLLECTING",
            TaskStatus::CollectionComplete => "COLLECTION_COMPLETE",
            TaskStatus::CollectionFailed => "COLLECTION_FAILED",
            TaskStatus::Analyzing => "ANALYZING",
            TaskStatus::AnalysisComplete => "ANALYSIS_COMPLETE",
            TaskStatus::AnalysisFailed => "ANALYSIS_FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable record of one pipeline run.
///
/// Write-once fields (`artifacts` entries, `error_log`) and the status state
/// machine are enforced here, so every store implementation gets the same
/// guarantees through [`TaskRecord::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Process-unique task identifier.
    pub task_id: String,
    /// What the caller asked for, e.g. a product name.
    #[serde(alias = "product_name")]
    pub goal: String,
    /// Current pipeline status.
    pub status: TaskStatus,
    /// Stage configuration supplied at creation.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Ordered transition summaries.
    #[serde(default)]
    pub history: Vec<String>,
    /// Named stage outputs.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    /// Failure diagnostic, set once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    /// Agent that recorded the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_by: Option<String>,
    /// When the orchestrator created the record.
    pub created_at: DateTime<Utc>,
    /// Last time a field changed through [`TaskRecord::apply`].
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a record in the `CREATED` state.
    pub fn new(task_id: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            goal: goal.into(),
            status: TaskStatus::Created,
            params: BTreeMap::new(),
            history: Vec::new(),
            artifacts: BTreeMap::new(),
            error_log: None,
            failed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the creation parameters.
    pub fn with_params(mut self, params: BTreeMap<String, serde_json::Value>) -> Self {
        self.params = params;
        self
    }

    /// Appends a history line.
    pub fn with_history(mut self, summary: impl Into<String>) -> Self {
        self.history.push(summary.into());
        self
    }

    /// Checks the structural invariants a stored record must satisfy.
    pub fn validate(&self) -> TrendvisorResult<()> {
        if self.task_id.trim().is_empty() {
            return Err(TrendvisorError::Validation("task_id is empty".into()));
        }
        if self.goal.trim().is_empty() {
            return Err(TrendvisorError::Validation(format!(
                "task {} has an empty goal",
                self.task_id
            )));
        }
        if self.error_log.is_some() && !self.status.is_failure() {
            return Err(TrendvisorError::Validation(format!(
                "task {} carries an error log but status is {}",
                self.task_id, self.status
            )));
        }
        Ok(())
    }

    /// Moves the record to `next`, rejecting transitions outside the pipeline.
    pub fn transition(&mut self, next: TaskStatus) -> TrendvisorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(TrendvisorError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records a named artifact. Each key can only be written once.
    pub fn record_artifact(
        &mut self,
        name: impl Into<String>,
        location: impl Into<String>,
    ) -> TrendvisorResult<()> {
        let name = name.into();
        if self.artifacts.contains_key(&name) {
            return Err(TrendvisorError::Validation(format!(
                "artifact '{name}' of task {} is already recorded",
                self.task_id
            )));
        }
        self.artifacts.insert(name, location.into());
        Ok(())
    }

    /// Records the failure diagnostic. Can only happen once per task.
    pub fn record_error(
        &mut self,
        error: impl Into<String>,
        failed_by: impl Into<String>,
    ) -> TrendvisorResult<()> {
        if self.error_log.is_some() {
            return Err(TrendvisorError::Validation(format!(
                "error log of task {} is already set",
                self.task_id
            )));
        }
        self.error_log = Some(error.into());
        self.failed_by = Some(failed_by.into());
        Ok(())
    }

    /// Applies a partial update. Status changes go first so that an error
    /// log is only accepted together with (or after) a failure status.
    pub fn apply(&mut self, update: TaskUpdate) -> TrendvisorResult<()> {
        if let Some(status) = update.status {
            self.transition(status)?;
        }
        for (name, location) in update.artifacts {
            self.record_artifact(name, location)?;
        }
        if let Some((error, agent)) = update.error {
            if !self.status.is_failure() {
                return Err(TrendvisorError::Validation(format!(
                    "task {} cannot record an error while {}",
                    self.task_id, self.status
                )));
            }
            self.record_error(error, agent)?;
        }
        self.history.extend(update.history);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Location of the collected data, once the collection stage succeeded.
    pub fn data_path(&self) -> Option<&str> {
        self.artifacts.get(DATA_PATH).map(String::as_str)
    }

    /// Location of the final report, once the analysis stage succeeded.
    pub fn report_path(&self) -> Option<&str> {
        self.artifacts.get(REPORT_PATH).map(String::as_str)
    }
}

/// A named-field update for [`TaskRecord::apply`]. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    /// New status, validated against the state machine.
    pub status: Option<TaskStatus>,
    /// Artifacts to add.
    pub artifacts: BTreeMap<String, String>,
    /// `(error_log, failed_by)` pair.
    pub error: Option<(String, String)>,
    /// History lines to append.
    pub history: Vec<String>,
}

impl TaskUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target status.
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds an artifact.
    pub fn artifact(mut self, name: impl Into<String>, location: impl Into<String>) -> Self {
        self.artifacts.insert(name.into(), location.into());
        self
    }

    /// Sets the failure diagnostic and the agent it is attributed to.
    pub fn error(mut self, error: impl Into<String>, failed_by: impl Into<String>) -> Self {
        self.error = Some((error.into(), failed_by.into()));
        self
    }

    /// Appends a history line.
    pub fn history(mut self, summary: impl Into<String>) -> Self {
        self.history.push(summary.into());
        self
    }

    /// Returns `true` if applying this update would change nothing but `updated_at`.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.artifacts.is_empty()
            && self.error.is_none()
            && self.history.is_empty()
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use trendvisor_core::{TaskRecord, TaskUpdate, TrendvisorError, TrendvisorResult};

/// Durable record of every task's status and accumulated metadata.
///
/// `save` is a full-snapshot write. `update` and `append_history` are
/// read-modify-write and are not atomic across concurrent writers; callers
/// rely on the pipeline's single-writer-per-stage invariant instead.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persists the complete record, replacing any prior record for its id.
    async fn save(&self, task: &TaskRecord) -> TrendvisorResult<()>;

    /// Loads a record. A stored record that fails structural validation is
    /// reported as `None` (and logged), never as a partial object.
    async fn get(&self, task_id: &str) -> TrendvisorResult<Option<TaskRecord>>;

    /// Ids of all stored tasks, sorted.
    async fn list(&self) -> TrendvisorResult<Vec<String>>;

    /// Loads the record, applies only the named fields and saves it back.
    async fn update(&self, task_id: &str, update: TaskUpdate) -> TrendvisorResult<TaskRecord> {
        let mut record = self
            .get(task_id)
            .await?
            .ok_or_else(|| TrendvisorError::TaskNotFound(task_id.to_string()))?;
        let new_status = update.status;
        record.apply(update)?;
        self.save(&record).await?;
        debug!(task_id = %task_id, status = ?new_status, "Task state updated");
        Ok(record)
    }

    /// Appends one line to the task's history.
    async fn append_history(&self, task_id: &str, summary: &str) -> TrendvisorResult<TaskRecord> {
        self.update(task_id, TaskUpdate::new().history(summary))
            .await
    }
}

/// Shared store handle.
pub type SharedStore = Arc<dyn StateStore>;

/// Key under which a task is stored, e.g. `task:task_sunscreen_1`.
pub fn task_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Serializes a record after checking it is fit to be stored.
pub(crate) fn encode_snapshot(task: &TaskRecord) -> TrendvisorResult<String> {
    task.validate()?;
    Ok(serde_json::to_string_pretty(task)?)
}

/// Decodes a stored snapshot, turning anything structurally wrong into `None`.
pub(crate) fn decode_snapshot(task_id: &str, raw: &str) -> Option<TaskRecord> {
    let record: TaskRecord = match serde_json::from_str(raw) {
        Ok(record) => record,
        Err(e) => {
            warn!(key = %task_key(task_id), error = %e, "Stored task record is undecodable");
            return None;
        }
    };
    if let Err(e) = record.validate() {
        warn!(key = %task_key(task_id), error = %e, "Stored task record is invalid");
        return None;
    }
    if record.task_id != task_id {
        warn!(
            key = %task_key(task_id),
            found = %record.task_id,
            "Stored task record belongs to another task"
        );
        return None;
    }
    Some(record)
}

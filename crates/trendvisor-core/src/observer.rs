//! Presentation sink.
//!
//! Agents and the orchestrator never print. They emit [`StatusRecord`]s to a
//! [`PipelineObserver`] that the embedding process supplies; the console
//! renderer in the CLI is one implementation, [`TracingObserver`] another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::event::EventType;

/// A structured status notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusRecord {
    /// Free-form progress message attributed to a category (usually an agent name).
    Status {
        /// Source category, e.g. `CollectionAgent`.
        category: String,
        /// Message text.
        message: String,
    },
    /// An agent picked up an event.
    EventReceived {
        /// Receiving agent.
        agent: String,
        /// Event type received.
        event_type: EventType,
        /// Task the event concerns.
        task_id: String,
    },
    /// A task finished successfully.
    TaskSucceeded {
        /// Finished task.
        task_id: String,
        /// Where the report was written.
        report_path: String,
    },
    /// A task ended in failure.
    TaskFailed {
        /// Failed task.
        task_id: String,
        /// Agent the failure is attributed to.
        agent: String,
        /// Failure diagnostic.
        error: String,
    },
    /// A non-terminal error worth surfacing (dropped event, handler fault).
    Error {
        /// Agent that hit the error.
        agent: String,
        /// Error text.
        message: String,
    },
}

impl StatusRecord {
    /// Convenience constructor for [`StatusRecord::Status`].
    pub fn status(category: impl Into<String>, message: impl Into<String>) -> Self {
        StatusRecord::Status {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`StatusRecord::Error`].
    pub fn error(agent: impl Into<String>, message: impl Into<String>) -> Self {
        StatusRecord::Error {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

/// Receives status records. Implementations must be cheap and non-blocking;
/// they are called from agent loops.
pub trait PipelineObserver: Send + Sync {
    /// Handles one record.
    fn notify(&self, record: StatusRecord);
}

/// Shared observer handle passed to agents.
pub type SharedObserver = Arc<dyn PipelineObserver>;

/// Observer that forwards every record to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn notify(&self, record: StatusRecord) {
        match record {
            StatusRecord::Status { category, message } => {
                tracing::info!(category = %category, "{message}");
            }
            StatusRecord::EventReceived {
                agent,
                event_type,
                task_id,
            } => {
                tracing::info!(agent = %agent, event_type = %event_type, task_id = %task_id, "Event received");
            }
            StatusRecord::TaskSucceeded {
                task_id,
                report_path,
            } => {
                tracing::info!(task_id = %task_id, report_path = %report_path, "Task complete");
            }
            StatusRecord::TaskFailed {
                task_id,
                agent,
                error,
            } => {
                tracing::error!(task_id = %task_id, agent = %agent, error = %error, "Task failed");
            }
            StatusRecord::Error { agent, message } => {
                tracing::warn!(agent = %agent, "{message}");
            }
        }
    }
}

/// Observer that keeps every record in memory, with a timestamp.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<(DateTime<Utc>, StatusRecord)>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records seen so far, oldest first.
    pub fn records(&self) -> Vec<StatusRecord> {
        self.records.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Only the terminal outcome records.
    pub fn outcomes(&self) -> Vec<StatusRecord> {
        self.records()
            .into_iter()
            .filter(|r| {
                matches!(
                    r,
                    StatusRecord::TaskSucceeded { .. } | StatusRecord::TaskFailed { .. }
                )
            })
            .collect()
    }
}

impl PipelineObserver for RecordingObserver {
    fn notify(&self, record: StatusRecord) {
        self.records.lock().push((Utc::now(), record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.notify(StatusRecord::status("SYSTEM", "starting"));
        observer.notify(StatusRecord::TaskSucceeded {
            task_id: "t1".into(),
            report_path: "results/t1.html".into(),
        });
        observer.notify(StatusRecord::error("AnalysisAgent", "dropped event"));

        let records = observer.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], StatusRecord::status("SYSTEM", "starting"));
        assert_eq!(observer.outcomes().len(), 1);
    }

    #[test]
    fn test_status_record_serialization() {
        let record = StatusRecord::EventReceived {
            agent: "CollectionAgent".into(),
            event_type: EventType::TaskCreated,
            task_id: "t1".into(),
        };
        let json = serde_json::to_value(&record).unwrap_or_default();
        assert_eq!(json["kind"], "event_received");
        assert_eq!(json["event_type"], "TASK_CREATED");
    }
}

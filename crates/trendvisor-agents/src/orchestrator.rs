use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use trendvisor_core::{
    Event, EventPayload, EventType, StatusRecord, TaskRecord, TrendvisorError, TrendvisorResult,
};

use crate::agent::{Agent, AgentContext};

/// Final outcome of a tracked task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// `TASK_COMPLETE` was received.
    Succeeded {
        /// Finished task.
        task_id: String,
        /// Where the report was written.
        report_path: String,
    },
    /// `TASK_FAILED` was received.
    Failed {
        /// Failed task.
        task_id: String,
        /// Agent that recorded the failure, or the event's source agent.
        failed_by: String,
        /// Failure diagnostic.
        error: String,
    },
}

impl TaskOutcome {
    /// Task the outcome belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            TaskOutcome::Succeeded { task_id, .. } | TaskOutcome::Failed { task_id, .. } => task_id,
        }
    }

    /// `true` for [`TaskOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

/// Finished outcomes kept for `outcome`/`wait_for`; the oldest are evicted.
pub const OUTCOME_RETENTION: usize = 1024;

#[derive(Default)]
struct Tracker {
    active: BTreeSet<String>,
    outcomes: HashMap<String, TaskOutcome>,
    finished: VecDeque<String>,
}

impl Tracker {
    fn finish(&mut self, task_id: String, outcome: TaskOutcome) {
        self.active.remove(&task_id);
        if self.outcomes.insert(task_id.clone(), outcome).is_none() {
            self.finished.push_back(task_id);
        }
        while self.finished.len() > OUTCOME_RETENTION {
            if let Some(evicted) = self.finished.pop_front() {
                self.outcomes.remove(&evicted);
            }
        }
    }
}

/// Starts tasks and reports their terminal outcome.
///
/// The orchestrator only knows about tasks it started itself; terminal
/// events for any other id are ignored.
pub struct OrchestratorAgent {
    ctx: AgentContext,
    tracker: Mutex<Tracker>,
    changed: Notify,
}

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

impl OrchestratorAgent {
    /// Name used on published events and in the monitor.
    pub const NAME: &'static str = "OrchestratorAgent";

    /// Creates an orchestrator with no tracked tasks.
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            tracker: Mutex::new(Tracker::default()),
            changed: Notify::new(),
        }
    }

    /// Creates the task record and publishes `TASK_CREATED`.
    ///
    /// The task is tracked before the event goes out, so an outcome that
    /// arrives immediately is not lost.
    pub async fn start_task(
        &self,
        goal: &str,
        params: BTreeMap<String, serde_json::Value>,
    ) -> TrendvisorResult<String> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(TrendvisorError::Validation("goal must not be empty".into()));
        }

        let task_id = next_task_id(goal);
        let record = TaskRecord::new(&task_id, goal)
            .with_params(params)
            .with_history(format!("Task created for '{goal}' by {}", Self::NAME));
        self.ctx.store.save(&record).await?;

        self.tracker.lock().active.insert(task_id.clone());
        let published = self.ctx.bus.publish(
            Self::NAME,
            EventPayload::TaskCreated {
                task_id: task_id.clone(),
                goal: goal.to_string(),
            },
        );
        if let Err(e) = published {
            self.tracker.lock().active.remove(&task_id);
            self.changed.notify_waiters();
            return Err(e);
        }

        info!(task_id = %task_id, goal = %goal, "Task created");
        self.ctx.observer.notify(StatusRecord::status(
            Self::NAME,
            format!("New task '{task_id}' created for '{goal}'"),
        ));
        Ok(task_id)
    }

    /// Ids of tasks that have not reached a terminal event yet.
    pub fn active_tasks(&self) -> Vec<String> {
        self.tracker.lock().active.iter().cloned().collect()
    }

    /// Recorded outcome of a finished task, among the last
    /// [`OUTCOME_RETENTION`] to finish.
    pub fn outcome(&self, task_id: &str) -> Option<TaskOutcome> {
        self.tracker.lock().outcomes.get(task_id).cloned()
    }

    /// Waits for the outcome of `task_id`. Returns `None` at once for an id
    /// this orchestrator never started, or whose outcome was evicted.
    pub async fn wait_for(&self, task_id: &str) -> Option<TaskOutcome> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let tracker = self.tracker.lock();
                if let Some(outcome) = tracker.outcomes.get(task_id) {
                    return Some(outcome.clone());
                }
                if !tracker.active.contains(task_id) {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Waits until no started task is still active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let idle = self.tracker.lock().active.is_empty();
            if idle {
                return;
            }
            notified.await;
        }
    }

    async fn conclude(&self, event: &Event) -> TrendvisorResult<TaskOutcome> {
        // On a store fault the event payload alone decides the outcome.
        let record = match self.ctx.store.get(event.task_id()).await {
            Ok(record) => record,
            Err(e) => {
                warn!(task_id = %event.task_id(), error = %e, "Could not read final record; using event payload");
                None
            }
        };
        let outcome = match &event.payload {
            EventPayload::TaskComplete {
                task_id,
                report_path,
            } => TaskOutcome::Succeeded {
                task_id: task_id.clone(),
                report_path: record
                    .as_ref()
                    .and_then(|r| r.report_path())
                    .unwrap_or(report_path.as_str())
                    .to_string(),
            },
            EventPayload::TaskFailed { task_id, error } => TaskOutcome::Failed {
                task_id: task_id.clone(),
                failed_by: record
                    .as_ref()
                    .and_then(|r| r.failed_by.clone())
                    .unwrap_or_else(|| event.source_agent.clone()),
                error: record
                    .as_ref()
                    .and_then(|r| r.error_log.clone())
                    .unwrap_or_else(|| error.clone()),
            },
            other => {
                return Err(TrendvisorError::Validation(format!(
                    "{} is not a terminal event",
                    other.event_type()
                )))
            }
        };
        Ok(outcome)
    }
}

#[async_trait]
impl Agent for OrchestratorAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &[EventType] {
        &[EventType::TaskComplete, EventType::TaskFailed]
    }

    async fn handle_event(&self, event: Event) -> TrendvisorResult<()> {
        let task_id = event.task_id().to_string();
        let tracked = self.tracker.lock().active.contains(&task_id);
        if !tracked {
            debug!(task_id = %task_id, event_type = %event.event_type(), "Ignoring event for untracked task");
            return Ok(());
        }
        self.ctx.observer.notify(StatusRecord::EventReceived {
            agent: Self::NAME.to_string(),
            event_type: event.event_type(),
            task_id: task_id.clone(),
        });

        let outcome = self.conclude(&event).await?;
        match &outcome {
            TaskOutcome::Succeeded { report_path, .. } => {
                info!(task_id = %task_id, report_path = %report_path, "Task succeeded");
                self.ctx.observer.notify(StatusRecord::TaskSucceeded {
                    task_id: task_id.clone(),
                    report_path: report_path.clone(),
                });
            }
            TaskOutcome::Failed {
                failed_by, error, ..
            } => {
                warn!(task_id = %task_id, failed_by = %failed_by, error = %error, "Task failed");
                self.ctx.observer.notify(StatusRecord::TaskFailed {
                    task_id: task_id.clone(),
                    agent: failed_by.clone(),
                    error: error.clone(),
                });
            }
        }

        self.tracker.lock().finish(task_id, outcome);
        self.changed.notify_waiters();
        Ok(())
    }
}

/// `task_<slug>_<unix millis>_<seq>`; the sequence keeps ids unique within
/// the process even when two tasks start in the same millisecond.
fn next_task_id(goal: &str) -> String {
    let seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "task_{}_{}_{seq}",
        slug(goal),
        Utc::now().timestamp_millis()
    )
}

fn slug(goal: &str) -> String {
    let mut out = String::new();
    for c in goal.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "goal".to_string()
    } else {
        trimmed.chars().take(40).collect()
    }
}

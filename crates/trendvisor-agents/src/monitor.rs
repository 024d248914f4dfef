use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Lifecycle state of an agent worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Started (or registered) and waiting for events.
    Idle,
    /// Dispatching an event.
    Working,
    /// The receive loop has exited.
    Stopped,
    /// The last dispatch faulted.
    Error,
}

/// Counters accumulated by an agent worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Events dispatched to the agent.
    pub events_handled: u64,
    /// Handler errors and panics.
    pub faults: u64,
    /// Stage tool runs that ended in a `ToolFailure`.
    pub tool_failures: u64,
    /// Total time spent in handlers, in milliseconds.
    pub duration_ms: u64,
}

/// Snapshot of one agent worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent name.
    pub name: String,
    /// Task of the event being handled, if any.
    pub current_task: Option<String>,
    /// Worker lifecycle state.
    pub status: WorkerStatus,
    /// Accumulated counters.
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            current_task: None,
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks state and metrics for every agent worker in the process.
///
/// Agents are keyed by name and registered on first mention, so workers do
/// not need to announce themselves up front.
#[derive(Clone, Default)]
pub struct AgentMonitor {
    states: Arc<RwLock<BTreeMap<String, AgentState>>>,
}

impl AgentMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_state(&self, name: &str, f: impl FnOnce(&mut AgentState)) {
        let mut states = self.states.write().await;
        let state = states
            .entry(name.to_string())
            .or_insert_with(|| AgentState::new(name));
        f(state);
    }

    /// Register an agent as idle.
    pub async fn register(&self, name: &str) {
        self.with_state(name, |state| state.status = WorkerStatus::Idle)
            .await;
    }

    /// Mark an agent as working on a task.
    pub async fn start_task(&self, name: &str, task_id: &str) {
        self.with_state(name, |state| {
            state.current_task = Some(task_id.to_string());
            state.status = WorkerStatus::Working;
        })
        .await;
    }

    /// Mark a dispatch as finished and account for its duration.
    pub async fn finish_task(&self, name: &str, duration_ms: u64) {
        self.with_state(name, |state| {
            state.current_task = None;
            state.status = WorkerStatus::Idle;
            state.metrics.events_handled += 1;
            state.metrics.duration_ms += duration_ms;
        })
        .await;
    }

    /// Record a handler fault (error or panic).
    pub async fn record_fault(&self, name: &str) {
        self.with_state(name, |state| {
            state.current_task = None;
            state.metrics.faults += 1;
            state.status = WorkerStatus::Error;
        })
        .await;
    }

    /// Record a failed stage tool invocation. The worker itself stays healthy.
    pub async fn record_tool_failure(&self, name: &str) {
        self.with_state(name, |state| state.metrics.tool_failures += 1)
            .await;
    }

    /// Mark an agent's loop as exited.
    pub async fn mark_stopped(&self, name: &str) {
        self.with_state(name, |state| {
            state.current_task = None;
            state.status = WorkerStatus::Stopped;
        })
        .await;
    }

    /// Get a snapshot of all agent states, ordered by name.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        states.values().cloned().collect()
    }

    /// Get the state of a specific agent.
    pub async fn get_state(&self, name: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(name).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.events_handled += state.metrics.events_handled;
            total.faults += state.metrics.faults;
            total.tool_failures += state.metrics.tool_failures;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

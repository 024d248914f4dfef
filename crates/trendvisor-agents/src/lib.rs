//! Agents of the Trendvisor pipeline and the worker that runs them.
//!
//! Three agents cooperate only through the bus and the state store:
//!
//! ```text
//! Orchestrator --TASK_CREATED--> Collection --COLLECTION_COMPLETE--> Analysis
//!      ^                              |                                  |
//!      +-------- TASK_FAILED ---------+---- TASK_COMPLETE / TASK_FAILED --+
//! ```
//!
//! # Main types
//!
//! - [`Agent`]: What an agent consumes and how it reacts.
//! - [`AgentWorker`]: Runs an agent on its own tokio task with cooperative stop.
//! - [`CollectionAgent`] / [`AnalysisAgent`]: Tool-backed pipeline stages.
//! - [`OrchestratorAgent`]: Starts tasks and reports their outcome.
//! - [`StageTool`] / [`CommandTool`]: External tool invocation.
//! - [`AgentMonitor`]: Per-agent status and counters.

/// Agent trait, shared context and worker lifecycle.
pub mod agent;
/// Analysis stage.
pub mod analysis;
/// Collection stage.
pub mod collection;
/// Agent status and metrics monitoring.
pub mod monitor;
/// Task creation and outcome tracking.
pub mod orchestrator;
mod stage;
/// Stage tool contract and subprocess implementation.
pub mod tool;

pub use agent::{Agent, AgentContext, AgentWorker, DEFAULT_STOP_TIMEOUT};
pub use analysis::AnalysisAgent;
pub use collection::CollectionAgent;
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use orchestrator::{OrchestratorAgent, TaskOutcome, OUTCOME_RETENTION};
pub use tool::{CommandTool, StageTool, ToolConfig};

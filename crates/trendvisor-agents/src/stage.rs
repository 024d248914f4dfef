use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, info};
use trendvisor_core::{
    EventPayload, StatusRecord, TaskStatus, TaskUpdate, ToolFailure, TrendvisorError,
    TrendvisorResult, DATA_PATH, REPORT_PATH,
};

use crate::agent::{panic_message, AgentContext};
use crate::tool::StageTool;

/// The two tool-backed stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageKind {
    /// Goal → raw data.
    Collection,
    /// Raw data → report.
    Analysis,
}

impl StageKind {
    fn running(self) -> TaskStatus {
        match self {
            StageKind::Collection => TaskStatus::Collecting,
            StageKind::Analysis => TaskStatus::Analyzing,
        }
    }

    fn complete(self) -> TaskStatus {
        match self {
            StageKind::Collection => TaskStatus::CollectionComplete,
            StageKind::Analysis => TaskStatus::AnalysisComplete,
        }
    }

    fn failed(self) -> TaskStatus {
        match self {
            StageKind::Collection => TaskStatus::CollectionFailed,
            StageKind::Analysis => TaskStatus::AnalysisFailed,
        }
    }

    fn artifact(self) -> &'static str {
        match self {
            StageKind::Collection => DATA_PATH,
            StageKind::Analysis => REPORT_PATH,
        }
    }

    fn label(self) -> &'static str {
        match self {
            StageKind::Collection => "Collection",
            StageKind::Analysis => "Analysis",
        }
    }

    fn success_event(self, task_id: &str, location: String) -> EventPayload {
        match self {
            StageKind::Collection => EventPayload::CollectionComplete {
                task_id: task_id.to_string(),
                data_path: location,
            },
            StageKind::Analysis => EventPayload::TaskComplete {
                task_id: task_id.to_string(),
                report_path: location,
            },
        }
    }
}

/// Drives one stage of one task: running status, tool call, outcome record,
/// outbound event.
pub(crate) struct StageRunner {
    pub(crate) agent: &'static str,
    pub(crate) kind: StageKind,
    pub(crate) ctx: AgentContext,
    pub(crate) tool: Arc<dyn StageTool>,
}

impl StageRunner {
    /// Runs the stage for `task_id` with `input` (the goal or the data path).
    ///
    /// Returns an error only when the task cannot enter the stage (unknown id
    /// or a status the stage cannot start from); in that case nothing is
    /// written or published. Any other fault, including a store error or a
    /// panicking tool, ends in exactly one `TASK_FAILED`.
    pub(crate) async fn run(&self, task_id: &str, input: &str) -> TrendvisorResult<()> {
        let outcome = match self.enter(task_id).await {
            Ok(()) => self.execute(task_id, input).await,
            Err(
                e @ (TrendvisorError::TaskNotFound(_) | TrendvisorError::InvalidTransition { .. }),
            ) => return Err(e),
            Err(e) => Err(e.to_string()),
        };

        let payload = match outcome {
            Ok(payload) => payload,
            Err(diagnostic) => self.fail(task_id, diagnostic).await,
        };
        self.ctx.bus.publish(self.agent, payload)?;
        Ok(())
    }

    async fn enter(&self, task_id: &str) -> TrendvisorResult<()> {
        let label = self.kind.label();
        self.ctx
            .store
            .update(
                task_id,
                TaskUpdate::new()
                    .status(self.kind.running())
                    .history(format!("{label} started by {}", self.agent)),
            )
            .await?;
        info!(agent = %self.agent, task_id = %task_id, status = %self.kind.running(), "Stage started");
        self.ctx.observer.notify(StatusRecord::status(
            self.agent,
            format!("{label} started for {task_id}"),
        ));
        Ok(())
    }

    async fn execute(&self, task_id: &str, input: &str) -> Result<EventPayload, String> {
        let ran = AssertUnwindSafe(self.tool.run(input, task_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ToolFailure::aborted(
                    self.tool.name(),
                    format!("panicked: {}", panic_message(&*panic)),
                ))
            });
        match ran {
            Ok(location) => self
                .complete(task_id, location)
                .await
                .map_err(|e| e.to_string()),
            Err(failure) => {
                self.ctx.monitor.record_tool_failure(self.agent).await;
                Err(failure.to_string())
            }
        }
    }

    async fn complete(&self, task_id: &str, location: String) -> TrendvisorResult<EventPayload> {
        let label = self.kind.label();
        self.ctx
            .store
            .update(
                task_id,
                TaskUpdate::new()
                    .status(self.kind.complete())
                    .artifact(self.kind.artifact(), &location)
                    .history(format!("{label} complete: {location}")),
            )
            .await?;
        info!(
            agent = %self.agent,
            task_id = %task_id,
            status = %self.kind.complete(),
            location = %location,
            "Stage complete"
        );
        self.ctx.observer.notify(StatusRecord::status(
            self.agent,
            format!("{label} complete for {task_id}: {location}"),
        ));
        Ok(self.kind.success_event(task_id, location))
    }

    /// Records the failure and returns the `TASK_FAILED` payload. A store
    /// error here is logged only, so the failure event still goes out.
    async fn fail(&self, task_id: &str, diagnostic: String) -> EventPayload {
        let label = self.kind.label();
        error!(
            agent = %self.agent,
            task_id = %task_id,
            error = %diagnostic,
            "Stage failed"
        );
        let update = TaskUpdate::new()
            .status(self.kind.failed())
            .error(&diagnostic, self.agent)
            .history(format!("{label} failed: {diagnostic}"));
        if let Err(e) = self.ctx.store.update(task_id, update).await {
            error!(agent = %self.agent, task_id = %task_id, error = %e, "Could not record stage failure");
        }
        self.ctx.observer.notify(StatusRecord::error(
            self.agent,
            format!("{label} failed for {task_id}: {diagnostic}"),
        ));
        EventPayload::TaskFailed {
            task_id: task_id.to_string(),
            error: diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_statuses_follow_pipeline() {
        for kind in [StageKind::Collection, StageKind::Analysis] {
            assert!(kind.running().can_transition_to(kind.complete()));
            assert!(kind.running().can_transition_to(kind.failed()));
            assert!(kind.failed().is_failure());
        }
        assert!(StageKind::Collection
            .complete()
            .can_transition_to(StageKind::Analysis.running()));
    }

    #[test]
    fn test_success_events() {
        let collected = StageKind::Collection.success_event("t", "data/t.json".into());
        assert_eq!(collected.event_type(), trendvisor_core::EventType::CollectionComplete);
        let analyzed = StageKind::Analysis.success_event("t", "results/t.html".into());
        assert_eq!(analyzed.event_type(), trendvisor_core::EventType::TaskComplete);
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use trendvisor_core::{Event, EventPayload, EventType, StatusRecord, TrendvisorResult};

use crate::agent::{Agent, AgentContext};
use crate::stage::{StageKind, StageRunner};
use crate::tool::StageTool;

/// Turns `COLLECTION_COMPLETE` into a report via the analysis tool.
pub struct AnalysisAgent {
    stage: StageRunner,
}

impl AnalysisAgent {
    /// Name used on published events and in the monitor.
    pub const NAME: &'static str = "AnalysisAgent";

    /// Creates the agent around its stage tool.
    pub fn new(ctx: AgentContext, tool: Arc<dyn StageTool>) -> Self {
        Self {
            stage: StageRunner {
                agent: Self::NAME,
                kind: StageKind::Analysis,
                ctx,
                tool,
            },
        }
    }
}

#[async_trait]
impl Agent for AnalysisAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &[EventType] {
        &[EventType::CollectionComplete]
    }

    async fn handle_event(&self, event: Event) -> TrendvisorResult<()> {
        let event_type = event.event_type();
        let EventPayload::CollectionComplete { task_id, data_path } = event.payload else {
            debug!(agent = Self::NAME, event_type = %event_type, "Ignoring event");
            return Ok(());
        };
        self.stage.ctx.observer.notify(StatusRecord::EventReceived {
            agent: Self::NAME.to_string(),
            event_type: EventType::CollectionComplete,
            task_id: task_id.clone(),
        });
        self.stage.run(&task_id, &data_path).await
    }
}

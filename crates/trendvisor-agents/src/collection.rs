use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use trendvisor_core::{Event, EventPayload, EventType, StatusRecord, TrendvisorResult};

use crate::agent::{Agent, AgentContext};
use crate::stage::{StageKind, StageRunner};
use crate::tool::StageTool;

/// Turns `TASK_CREATED` into collected data via the collection tool.
pub struct CollectionAgent {
    stage: StageRunner,
}

impl CollectionAgent {
    /// Name used on published events and in the monitor.
    pub const NAME: &'static str = "CollectionAgent";

    /// Creates the agent around its stage tool.
    pub fn new(ctx: AgentContext, tool: Arc<dyn StageTool>) -> Self {
        Self {
            stage: StageRunner {
                agent: Self::NAME,
                kind: StageKind::Collection,
                ctx,
                tool,
            },
        }
    }
}

#[async_trait]
impl Agent for CollectionAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> &[EventType] {
        &[EventType::TaskCreated]
    }

    async fn handle_event(&self, event: Event) -> TrendvisorResult<()> {
        let event_type = event.event_type();
        let EventPayload::TaskCreated { task_id, goal } = event.payload else {
            debug!(agent = Self::NAME, event_type = %event_type, "Ignoring event");
            return Ok(());
        };
        self.stage.ctx.observer.notify(StatusRecord::EventReceived {
            agent: Self::NAME.to_string(),
            event_type: EventType::TaskCreated,
            task_id: task_id.clone(),
        });
        self.stage.run(&task_id, &goal).await
    }
}

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trendvisor_bus::{EventHandler, SharedBus};
use trendvisor_core::{
    Event, EventType, SharedObserver, StatusRecord, TrendvisorError, TrendvisorResult,
};
use trendvisor_store::SharedStore;

use crate::monitor::AgentMonitor;

/// Default upper bound on how long [`AgentWorker::stop`] waits for the loop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// An independently scheduled participant in the pipeline.
///
/// An agent declares the event types it consumes once, at construction, and
/// reacts to each delivered event in `handle_event`. Lifecycle (subscribing,
/// the receive loop, stopping) lives in [`AgentWorker`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable name, used as `source_agent` on published events.
    fn name(&self) -> &str;

    /// Event types this agent consumes. May be empty.
    fn subscriptions(&self) -> &[EventType];

    /// Handles one event. Errors are logged by the worker and do not stop it.
    async fn handle_event(&self, event: Event) -> TrendvisorResult<()>;
}

/// Collaborators shared by every agent in a pipeline.
#[derive(Clone)]
pub struct AgentContext {
    /// Task state.
    pub store: SharedStore,
    /// Event transport.
    pub bus: SharedBus,
    /// Sink for human-facing status records.
    pub observer: SharedObserver,
    /// Per-agent runtime state, shared by all workers.
    pub monitor: AgentMonitor,
}

impl AgentContext {
    /// Builds a context with a fresh monitor.
    pub fn new(store: SharedStore, bus: SharedBus, observer: SharedObserver) -> Self {
        Self {
            store,
            bus,
            observer,
            monitor: AgentMonitor::new(),
        }
    }

    /// Replaces the monitor, e.g. to share one across pipelines.
    pub fn with_monitor(mut self, monitor: AgentMonitor) -> Self {
        self.monitor = monitor;
        self
    }
}

/// Runs one [`Agent`] on its own tokio task.
pub struct AgentWorker {
    agent: Arc<dyn Agent>,
    ctx: AgentContext,
    stop_timeout: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl AgentWorker {
    /// Wraps `agent`; nothing runs until [`AgentWorker::start`].
    pub fn new(agent: Arc<dyn Agent>, ctx: AgentContext) -> Self {
        Self {
            agent,
            ctx,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Overrides [`DEFAULT_STOP_TIMEOUT`].
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Name of the wrapped agent.
    pub fn name(&self) -> &str {
        self.agent.name()
    }

    /// Returns `true` while the receive loop task has not finished.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Attaches the subscription and spawns the receive loop. Returns
    /// immediately; anything published after this returns is delivered.
    ///
    /// A worker can be started once.
    pub async fn start(&self) -> TrendvisorResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TrendvisorError::Agent(format!(
                "{} is already started",
                self.agent.name()
            )));
        }

        let name = self.agent.name().to_string();
        self.ctx.monitor.register(&name).await;
        let cancel = self.cancel.clone();

        let handle = if self.agent.subscriptions().is_empty() {
            info!(agent = %name, "No subscriptions; idling until stopped");
            tokio::spawn(async move { cancel.cancelled().await })
        } else {
            let subscription = match self.ctx.bus.subscribe(self.agent.subscriptions()) {
                Ok(subscription) => subscription,
                Err(e) => {
                    self.started.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };
            let dispatcher = Dispatcher {
                agent: self.agent.clone(),
                ctx: self.ctx.clone(),
            };
            tokio::spawn(async move {
                subscription.listen(&dispatcher, &cancel).await;
            })
        };

        *self.handle.lock() = Some(handle);
        info!(agent = %name, "Agent started");
        self.ctx
            .observer
            .notify(StatusRecord::status(name, "Agent started"));
        Ok(())
    }

    /// Signals the loop to exit and waits up to the stop timeout for it.
    ///
    /// Returns `true` if the loop exited in time (or was never started) and
    /// `false` if it was still running when the timeout elapsed. An in-flight
    /// handler is never preempted.
    pub async fn stop(&self) -> bool {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return true;
        };

        let name = self.agent.name();
        let exited = match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(agent = %name, error = %e, "Agent loop task failed");
                true
            }
            Err(_) => {
                warn!(
                    agent = %name,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Agent did not stop in time"
                );
                false
            }
        };

        if exited {
            self.ctx.monitor.mark_stopped(name).await;
            info!(agent = %name, "Agent stopped");
        }
        exited
    }
}

/// Bridges bus deliveries to an agent, isolating its faults.
struct Dispatcher {
    agent: Arc<dyn Agent>,
    ctx: AgentContext,
}

#[async_trait]
impl EventHandler for Dispatcher {
    async fn on_event(&self, event: Event) {
        let name = self.agent.name();
        let task_id = event.task_id().to_string();
        let event_type = event.event_type();
        debug!(agent = %name, event_type = %event_type, task_id = %task_id, "Dispatching event");

        self.ctx.monitor.start_task(name, &task_id).await;
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.agent.handle_event(event))
            .catch_unwind()
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("handler panicked: {}", panic_message(&*panic))),
        };

        self.ctx.monitor.finish_task(name, elapsed_ms).await;
        if let Some(message) = fault {
            error!(
                agent = %name,
                event_type = %event_type,
                task_id = %task_id,
                error = %message,
                "Event handler failed"
            );
            self.ctx.monitor.record_fault(name).await;
            self.ctx.observer.notify(StatusRecord::error(
                name,
                format!("{event_type} for {task_id}: {message}"),
            ));
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

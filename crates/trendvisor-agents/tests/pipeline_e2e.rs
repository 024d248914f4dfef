//! End-to-end pipeline tests.
//!
//! Runs the orchestrator, collection and analysis agents against an
//! in-process bus with fake stage tools. Checks: the published event path of
//! each task, the final record, fault isolation and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use trendvisor_agents::*;
use trendvisor_bus::{BusConfig, InMemoryMessageBus, MessageBus, Received, Subscription};
use trendvisor_core::{
    EventType, RecordingObserver, StatusRecord, TaskRecord, TaskStatus, ToolFailure,
    TrendvisorResult,
};
use trendvisor_store::{FileStateStore, InMemoryStateStore, SharedStore, StateStore};

// ---------------------------------------------------------------------------
// Fake stage tools
// ---------------------------------------------------------------------------

type Behavior = fn(&str, &str) -> Result<String, ToolFailure>;

struct FakeTool {
    name: &'static str,
    behavior: Behavior,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeTool {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StageTool for FakeTool {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, input: &str, task_id: &str) -> Result<String, ToolFailure> {
        self.calls
            .lock()
            .push((input.to_string(), task_id.to_string()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        (self.behavior)(input, task_id)
    }
}

fn collect_ok(_goal: &str, task_id: &str) -> Result<String, ToolFailure> {
    Ok(format!("data/{task_id}.json"))
}

fn analyze_ok(_data_path: &str, task_id: &str) -> Result<String, ToolFailure> {
    Ok(format!("results/{task_id}.html"))
}

fn collect_timeout(_goal: &str, _task_id: &str) -> Result<String, ToolFailure> {
    Err(ToolFailure::exited("collection", 1, "timeout"))
}

fn collect_panics(_goal: &str, _task_id: &str) -> Result<String, ToolFailure> {
    panic!("scraper crashed")
}

fn analyze_broken(_data_path: &str, _task_id: &str) -> Result<String, ToolFailure> {
    Err(ToolFailure::exited("analysis", 2, "no reviews in data file"))
}

/// In-memory store whose `nth` save (1-based) fails once with an I/O error.
struct FlakyStore {
    inner: InMemoryStateStore,
    saves: AtomicUsize,
    nth: usize,
}

impl FlakyStore {
    fn failing_save(nth: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStateStore::new(),
            saves: AtomicUsize::new(0),
            nth,
        })
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn save(&self, task: &TaskRecord) -> TrendvisorResult<()> {
        if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            return Err(std::io::Error::other("disk hiccup").into());
        }
        self.inner.save(task).await
    }

    async fn get(&self, task_id: &str) -> TrendvisorResult<Option<TaskRecord>> {
        self.inner.get(task_id).await
    }

    async fn list(&self) -> TrendvisorResult<Vec<String>> {
        self.inner.list().await
    }
}

// ---------------------------------------------------------------------------
// Pipeline harness
// ---------------------------------------------------------------------------

struct Pipeline {
    bus: Arc<InMemoryMessageBus>,
    store: SharedStore,
    observer: Arc<RecordingObserver>,
    monitor: AgentMonitor,
    orchestrator: Arc<OrchestratorAgent>,
    workers: Vec<AgentWorker>,
}

impl Pipeline {
    async fn start(
        store: SharedStore,
        collection: Arc<dyn StageTool>,
        analysis: Arc<dyn StageTool>,
    ) -> Self {
        let bus = Arc::new(
            InMemoryMessageBus::new(BusConfig {
                poll_interval: Duration::from_millis(20),
                ..BusConfig::default()
            })
            .unwrap(),
        );
        let observer = Arc::new(RecordingObserver::new());
        let ctx = AgentContext::new(store.clone(), bus.clone(), observer.clone());
        let monitor = ctx.monitor.clone();

        let orchestrator = Arc::new(OrchestratorAgent::new(ctx.clone()));
        let agents: Vec<Arc<dyn Agent>> = vec![
            orchestrator.clone(),
            Arc::new(CollectionAgent::new(ctx.clone(), collection)),
            Arc::new(AnalysisAgent::new(ctx.clone(), analysis)),
        ];
        let mut workers = Vec::new();
        for agent in agents {
            let worker = AgentWorker::new(agent, ctx.clone());
            worker.start().await.unwrap();
            workers.push(worker);
        }

        Self {
            bus,
            store,
            observer,
            monitor,
            orchestrator,
            workers,
        }
    }

    async fn in_memory(collection: Arc<dyn StageTool>, analysis: Arc<dyn StageTool>) -> Self {
        Self::start(Arc::new(InMemoryStateStore::new()), collection, analysis).await
    }

    /// Subscribes to every event type, to observe what the agents publish.
    fn tap(&self) -> Subscription {
        self.bus.subscribe(&EventType::ALL).unwrap()
    }

    async fn run(&self, goal: &str) -> (String, TaskOutcome) {
        let task_id = self
            .orchestrator
            .start_task(goal, BTreeMap::new())
            .await
            .unwrap();
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            self.orchestrator.wait_for(&task_id),
        )
        .await
        .expect("task should finish")
        .expect("task should be tracked");
        (task_id, outcome)
    }

    async fn shutdown(&self) {
        for worker in self.workers.iter().rev() {
            assert!(worker.stop().await, "{} did not stop", worker.name());
        }
    }
}

/// Drains the tap until it stays silent for one poll interval.
async fn drain(tap: &mut Subscription) -> Vec<(EventType, String)> {
    let mut seen = Vec::new();
    loop {
        match tap.recv().await {
            Received::Event(event) => {
                seen.push((event.event_type(), event.task_id().to_string()));
            }
            Received::Dropped => {}
            Received::Timeout | Received::Closed => return seen,
        }
    }
}

fn types_for(seen: &[(EventType, String)], task_id: &str) -> Vec<EventType> {
    seen.iter()
        .filter(|(_, id)| id == task_id)
        .map(|(t, _)| *t)
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sunscreen_happy_path() {
    let collection = FakeTool::new("collection", collect_ok);
    let analysis = FakeTool::new("analysis", analyze_ok);
    let pipeline = Pipeline::in_memory(collection.clone(), analysis.clone()).await;
    let mut tap = pipeline.tap();

    let (task_id, outcome) = pipeline.run("sunscreen").await;
    assert_eq!(
        outcome,
        TaskOutcome::Succeeded {
            task_id: task_id.clone(),
            report_path: format!("results/{task_id}.html"),
        }
    );

    let record = pipeline.store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::AnalysisComplete);
    assert_eq!(record.data_path(), Some(format!("data/{task_id}.json").as_str()));
    assert_eq!(
        record.report_path(),
        Some(format!("results/{task_id}.html").as_str())
    );
    assert!(record.error_log.is_none());
    assert_eq!(record.history.len(), 5);

    assert_eq!(collection.calls(), vec![("sunscreen".to_string(), task_id.clone())]);
    assert_eq!(
        analysis.calls(),
        vec![(format!("data/{task_id}.json"), task_id.clone())]
    );

    let seen = drain(&mut tap).await;
    assert_eq!(
        types_for(&seen, &task_id),
        vec![
            EventType::TaskCreated,
            EventType::CollectionComplete,
            EventType::TaskComplete
        ]
    );
    assert_eq!(
        pipeline.observer.outcomes(),
        vec![StatusRecord::TaskSucceeded {
            task_id: task_id.clone(),
            report_path: format!("results/{task_id}.html"),
        }]
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_collection_failure_skips_analysis() {
    let collection = FakeTool::new("collection", collect_timeout);
    let analysis = FakeTool::new("analysis", analyze_ok);
    let pipeline = Pipeline::in_memory(collection, analysis.clone()).await;
    let mut tap = pipeline.tap();

    let (task_id, outcome) = pipeline.run("sunscreen").await;
    match &outcome {
        TaskOutcome::Failed {
            failed_by, error, ..
        } => {
            assert_eq!(failed_by, CollectionAgent::NAME);
            assert!(error.contains("timeout"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let record = pipeline.store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::CollectionFailed);
    assert!(record.error_log.as_deref().unwrap().contains("timeout"));
    assert_eq!(record.failed_by.as_deref(), Some(CollectionAgent::NAME));
    assert!(record.data_path().is_none());
    assert!(analysis.calls().is_empty());

    let seen = drain(&mut tap).await;
    assert_eq!(
        types_for(&seen, &task_id),
        vec![EventType::TaskCreated, EventType::TaskFailed]
    );

    let state = pipeline.monitor.get_state(CollectionAgent::NAME).await.unwrap();
    assert_eq!(state.metrics.tool_failures, 1);
    assert_eq!(state.metrics.faults, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_analysis_failure_keeps_collected_data() {
    let pipeline = Pipeline::in_memory(
        FakeTool::new("collection", collect_ok),
        FakeTool::new("analysis", analyze_broken),
    )
    .await;

    let (task_id, outcome) = pipeline.run("toner").await;
    assert!(!outcome.is_success());

    let record = pipeline.store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::AnalysisFailed);
    assert_eq!(record.failed_by.as_deref(), Some(AnalysisAgent::NAME));
    assert!(record.data_path().is_some());
    assert!(record.report_path().is_none());
    assert!(record
        .error_log
        .as_deref()
        .unwrap()
        .contains("no reviews in data file"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_tasks_do_not_cross() {
    let pipeline = Pipeline::in_memory(
        FakeTool::new("collection", collect_ok),
        FakeTool::new("analysis", analyze_ok),
    )
    .await;
    let mut tap = pipeline.tap();

    let first = pipeline
        .orchestrator
        .start_task("sunscreen", BTreeMap::new())
        .await
        .unwrap();
    let second = pipeline
        .orchestrator
        .start_task("cleansing foam", BTreeMap::new())
        .await
        .unwrap();
    assert_ne!(first, second);

    tokio::time::timeout(Duration::from_secs(5), pipeline.orchestrator.wait_idle())
        .await
        .expect("both tasks should finish");

    for task_id in [&first, &second] {
        let record = pipeline.store.get(task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::AnalysisComplete);
        assert!(record.data_path().unwrap().contains(task_id.as_str()));
        assert!(record.report_path().unwrap().contains(task_id.as_str()));
        assert!(pipeline.orchestrator.outcome(task_id).unwrap().is_success());
    }
    let sunscreen = pipeline.store.get(&first).await.unwrap().unwrap();
    assert_eq!(sunscreen.goal, "sunscreen");

    let seen = drain(&mut tap).await;
    for task_id in [&first, &second] {
        let terminal = types_for(&seen, task_id)
            .into_iter()
            .filter(|t| t.is_terminal())
            .count();
        assert_eq!(terminal, 1);
    }

    pipeline.shutdown().await;
}

// ---------------------------------------------------------------------------
// Robustness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_event_does_not_stop_pipeline() {
    let collection = FakeTool::new("collection", collect_ok);
    let pipeline =
        Pipeline::in_memory(collection.clone(), FakeTool::new("analysis", analyze_ok)).await;

    let missing_task_id = r#"{"event_id":"e1","timestamp":"2024-05-01T00:00:00Z","event_type":"TASK_CREATED","source_agent":"intruder","payload":{"goal":"sunscreen"}}"#;
    pipeline
        .bus
        .publish_raw(EventType::TaskCreated, missing_task_id.to_string())
        .unwrap();
    pipeline
        .bus
        .publish_raw(EventType::TaskCreated, "not json at all".to_string())
        .unwrap();

    let (task_id, outcome) = pipeline.run("sunscreen").await;
    assert!(outcome.is_success());
    assert_eq!(collection.calls().len(), 1);
    assert_eq!(pipeline.store.list().await.unwrap(), vec![task_id]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_event_for_unknown_task_is_a_contained_fault() {
    let collection = FakeTool::new("collection", collect_ok);
    let pipeline =
        Pipeline::in_memory(collection.clone(), FakeTool::new("analysis", analyze_ok)).await;
    let mut tap = pipeline.tap();

    pipeline
        .bus
        .publish(
            "intruder",
            trendvisor_core::EventPayload::TaskCreated {
                task_id: "task_ghost".into(),
                goal: "sunscreen".into(),
            },
        )
        .unwrap();

    let (task_id, outcome) = pipeline.run("sunscreen").await;
    assert!(outcome.is_success());
    assert_eq!(collection.calls().len(), 1);

    let seen = drain(&mut tap).await;
    assert_eq!(types_for(&seen, "task_ghost"), vec![EventType::TaskCreated]);
    assert_eq!(types_for(&seen, &task_id).len(), 3);

    let state = pipeline.monitor.get_state(CollectionAgent::NAME).await.unwrap();
    assert_eq!(state.metrics.faults, 1);
    assert_eq!(state.metrics.events_handled, 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_panicking_tool_fails_the_task() {
    let collection = FakeTool::new("collection", collect_panics);
    let analysis = FakeTool::new("analysis", analyze_ok);
    let pipeline = Pipeline::in_memory(collection, analysis.clone()).await;
    let mut tap = pipeline.tap();

    let (task_id, outcome) = pipeline.run("sunscreen").await;
    match &outcome {
        TaskOutcome::Failed {
            failed_by, error, ..
        } => {
            assert_eq!(failed_by, CollectionAgent::NAME);
            assert!(error.contains("panicked: scraper crashed"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let record = pipeline.store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::CollectionFailed);
    assert_eq!(record.failed_by.as_deref(), Some(CollectionAgent::NAME));
    assert!(analysis.calls().is_empty());

    let seen = drain(&mut tap).await;
    assert_eq!(
        types_for(&seen, &task_id),
        vec![EventType::TaskCreated, EventType::TaskFailed]
    );
    let state = pipeline
        .monitor
        .get_state(CollectionAgent::NAME)
        .await
        .unwrap();
    assert_eq!(state.metrics.tool_failures, 1);
    assert_eq!(state.metrics.faults, 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_store_error_still_ends_the_task() {
    // Save 1 is the orchestrator's CREATED record; save 2 is the collection
    // agent's COLLECTING write.
    let store = FlakyStore::failing_save(2);
    let collection = FakeTool::new("collection", collect_ok);
    let analysis = FakeTool::new("analysis", analyze_ok);
    let pipeline = Pipeline::start(store, collection.clone(), analysis.clone()).await;
    let mut tap = pipeline.tap();

    let (task_id, outcome) = pipeline.run("sunscreen").await;
    match &outcome {
        TaskOutcome::Failed {
            failed_by, error, ..
        } => {
            assert_eq!(failed_by, CollectionAgent::NAME);
            assert!(error.contains("disk hiccup"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(collection.calls().is_empty());
    assert!(analysis.calls().is_empty());
    assert!(pipeline.orchestrator.active_tasks().is_empty());

    let seen = drain(&mut tap).await;
    assert_eq!(
        types_for(&seen, &task_id),
        vec![EventType::TaskCreated, EventType::TaskFailed]
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_stop_is_prompt_and_marks_workers() {
    let pipeline = Pipeline::in_memory(
        FakeTool::new("collection", collect_ok),
        FakeTool::new("analysis", analyze_ok),
    )
    .await;

    let began = Instant::now();
    pipeline.shutdown().await;
    assert!(began.elapsed() < Duration::from_secs(1));

    for state in pipeline.monitor.snapshot().await {
        assert_eq!(state.status, WorkerStatus::Stopped, "{}", state.name);
    }
    assert!(pipeline.workers.iter().all(|w| !w.is_running()));
}

// ---------------------------------------------------------------------------
// Real tools and durable state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shell_tools_with_file_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStateStore::new(tmp.path().join("tasks")).await.unwrap());
    let sh = |script: &str| -> Arc<dyn StageTool> {
        Arc::new(CommandTool::new(
            "sh",
            ToolConfig {
                program: "sh".into(),
                args: vec!["-c".into(), script.into(), "tool".into()],
                timeout_secs: Some(10),
            },
        ))
    };

    let pipeline = Pipeline::start(
        store,
        sh(r#"echo "crawling reviews for $1" >&2; echo "data/$2.json""#),
        sh(r#"echo "analyzing $1"; echo "results/$2.html""#),
    )
    .await;
    let (task_id, outcome) = pipeline.run("sunscreen").await;
    assert!(outcome.is_success());
    pipeline.shutdown().await;

    let reopened = FileStateStore::new(tmp.path().join("tasks")).await.unwrap();
    let record = reopened.get(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::AnalysisComplete);
    assert_eq!(record.report_path(), Some(format!("results/{task_id}.html").as_str()));
}

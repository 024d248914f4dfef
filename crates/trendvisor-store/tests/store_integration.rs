#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use serde_json::json;
use trendvisor_core::{TaskRecord, TaskStatus, TaskUpdate, TrendvisorError, DATA_PATH, REPORT_PATH};
use trendvisor_store::{FileStateStore, InMemoryStateStore, StateStore};

/// Helper: create a FileStateStore in a temp directory.
async fn temp_store() -> (FileStateStore, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(tmp.path().join("tasks")).await.unwrap();
    (store, tmp)
}

fn sunscreen_record(task_id: &str) -> TaskRecord {
    let mut params = BTreeMap::new();
    params.insert("max_reviews".to_string(), json!(50));
    params.insert("sources".to_string(), json!({"mall": ["oliveyoung", "coupang"]}));
    TaskRecord::new(task_id, "sunscreen")
        .with_params(params)
        .with_history("Task created for 'sunscreen'")
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_save_and_get_preserves_nested_fields() {
    let (store, _tmp) = temp_store().await;
    let record = sunscreen_record("task_sunscreen_1");
    store.save(&record).await.unwrap();

    let loaded = store.get("task_sunscreen_1").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(loaded.params["sources"]["mall"][1], "coupang");
}

#[tokio::test]
async fn test_save_is_idempotent() {
    let (store, _tmp) = temp_store().await;
    let record = sunscreen_record("task_a");
    store.save(&record).await.unwrap();
    store.save(&record).await.unwrap();

    assert_eq!(store.list().await.unwrap(), vec!["task_a"]);
    assert_eq!(store.get("task_a").await.unwrap(), Some(record));
}

#[tokio::test]
async fn test_get_nonexistent_returns_none() {
    let (store, _tmp) = temp_store().await;
    assert!(store.get("task_missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("tasks");
    {
        let store = FileStateStore::new(&dir).await.unwrap();
        store.save(&sunscreen_record("task_a")).await.unwrap();
        store
            .update("task_a", TaskUpdate::new().status(TaskStatus::Collecting))
            .await
            .unwrap();
    }

    let reopened = FileStateStore::new(&dir).await.unwrap();
    let loaded = reopened.get("task_a").await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Collecting);
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_pipeline_updates() {
    let (store, _tmp) = temp_store().await;
    store.save(&sunscreen_record("task_a")).await.unwrap();

    store
        .update(
            "task_a",
            TaskUpdate::new()
                .status(TaskStatus::Collecting)
                .history("Collection started"),
        )
        .await
        .unwrap();
    store
        .update(
            "task_a",
            TaskUpdate::new()
                .status(TaskStatus::CollectionComplete)
                .artifact(DATA_PATH, "data/task_a.json"),
        )
        .await
        .unwrap();
    store
        .update("task_a", TaskUpdate::new().status(TaskStatus::Analyzing))
        .await
        .unwrap();
    let done = store
        .update(
            "task_a",
            TaskUpdate::new()
                .status(TaskStatus::AnalysisComplete)
                .artifact(REPORT_PATH, "results/task_a.html"),
        )
        .await
        .unwrap();

    assert_eq!(done.status, TaskStatus::AnalysisComplete);
    assert_eq!(done.data_path(), Some("data/task_a.json"));
    assert_eq!(done.report_path(), Some("results/task_a.html"));
    assert_eq!(done.history.len(), 2);
    assert!(done.error_log.is_none());
    assert_eq!(store.get("task_a").await.unwrap(), Some(done));
}

#[tokio::test]
async fn test_append_history_keeps_order() {
    let (store, _tmp) = temp_store().await;
    store.save(&sunscreen_record("task_a")).await.unwrap();

    store.append_history("task_a", "first").await.unwrap();
    let record = store.append_history("task_a", "second").await.unwrap();

    assert_eq!(record.status, TaskStatus::Created);
    assert_eq!(
        record.history,
        vec!["Task created for 'sunscreen'", "first", "second"]
    );
}

#[tokio::test]
async fn test_failure_sets_error_once() {
    let (store, _tmp) = temp_store().await;
    store.save(&sunscreen_record("task_a")).await.unwrap();
    store
        .update("task_a", TaskUpdate::new().status(TaskStatus::Collecting))
        .await
        .unwrap();

    let failed = store
        .update(
            "task_a",
            TaskUpdate::new()
                .status(TaskStatus::CollectionFailed)
                .error("timeout", "CollectionAgent"),
        )
        .await
        .unwrap();
    assert_eq!(failed.error_log.as_deref(), Some("timeout"));
    assert_eq!(failed.failed_by.as_deref(), Some("CollectionAgent"));

    let again = store
        .update("task_a", TaskUpdate::new().error("second", "AnalysisAgent"))
        .await;
    assert!(again.is_err());
    let stored = store.get("task_a").await.unwrap().unwrap();
    assert_eq!(stored.error_log.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_update_unknown_task_is_not_found() {
    let (store, _tmp) = temp_store().await;
    let err = store.append_history("ghost", "x").await.unwrap_err();
    assert!(matches!(err, TrendvisorError::TaskNotFound(_)));
    assert!(store.list().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Damage and availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_corrupted_file_reads_as_missing() {
    let (store, _tmp) = temp_store().await;
    store.save(&sunscreen_record("task_a")).await.unwrap();
    std::fs::write(store.dir().join("task_a.json"), "{\"task_id\": \"task_a\"").unwrap();

    assert!(store.get("task_a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_ignores_foreign_files() {
    let (store, _tmp) = temp_store().await;
    store.save(&sunscreen_record("task_b")).await.unwrap();
    store.save(&sunscreen_record("task a/1")).await.unwrap();
    std::fs::write(store.dir().join("notes.txt"), "hello").unwrap();

    assert_eq!(store.list().await.unwrap(), vec!["task a/1", "task_b"]);
    assert!(store.get("task a/1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unusable_directory_is_store_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, "not a dir").unwrap();

    let result = FileStateStore::new(blocker.join("tasks")).await;
    assert!(matches!(result, Err(TrendvisorError::StoreUnavailable(_))));
}

#[tokio::test]
async fn test_backends_agree() {
    let (file, _tmp) = temp_store().await;
    let memory = InMemoryStateStore::new();
    let record = sunscreen_record("task_a");
    let update = || {
        TaskUpdate::new()
            .status(TaskStatus::Collecting)
            .history("Collection started")
    };

    file.save(&record).await.unwrap();
    memory.save(&record).await.unwrap();
    let from_file = file.update("task_a", update()).await.unwrap();
    let from_memory = memory.update("task_a", update()).await.unwrap();

    assert_eq!(from_file.status, from_memory.status);
    assert_eq!(from_file.history, from_memory.history);
    assert_eq!(from_file.artifacts, from_memory.artifacts);
}

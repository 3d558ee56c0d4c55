use std::sync::Arc;

use chrono::{Duration, Utc};
use syncer_core::{LogLevel, TaskLogRecord, TaskStatus, TaskStore};
use syncer_dispatcher::StallDetector;
use syncer_infrastructure::InMemoryStore;
use syncer_testing_utils::TaskBuilder;

async fn log_at(store: &InMemoryStore, task_id: &str, minutes_ago: i64) {
    let mut record = TaskLogRecord::new("[SYNC]", LogLevel::Info, "progress");
    record.time = Utc::now() - Duration::minutes(minutes_ago);
    store.append_log(task_id, &record).await.unwrap();
}

#[tokio::test]
async fn test_running_task_with_recent_log_is_not_stalled() {
    let store = Arc::new(InMemoryStore::new());
    let task = TaskBuilder::new("s1", "c1")
        .with_status(TaskStatus::Running)
        .started_at(Utc::now() - Duration::minutes(30))
        .build();
    store.create_task(&task).await.unwrap();
    log_at(&store, &task.id, 2).await;

    let detector = StallDetector::new(store.clone());
    let stalled = detector
        .find_stalled(TaskStatus::Running, TaskStatus::Scheduled, Duration::minutes(5))
        .await
        .unwrap();
    assert!(stalled.is_empty());
}

#[tokio::test]
async fn test_running_task_with_old_log_is_stalled() {
    let store = Arc::new(InMemoryStore::new());
    let task = TaskBuilder::new("s1", "c1")
        .with_status(TaskStatus::Running)
        .started_at(Utc::now() - Duration::minutes(30))
        .build();
    store.create_task(&task).await.unwrap();
    log_at(&store, &task.id, 10).await;

    let detector = StallDetector::new(store.clone());
    let stalled = detector
        .find_stalled(TaskStatus::Running, TaskStatus::Scheduled, Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(stalled, vec![task.id]);
}

#[tokio::test]
async fn test_running_task_without_logs_uses_started_at() {
    let store = Arc::new(InMemoryStore::new());
    let fresh = TaskBuilder::new("s1", "c1")
        .with_status(TaskStatus::Running)
        .started_at(Utc::now() - Duration::minutes(1))
        .build();
    let old = TaskBuilder::new("s1", "c2")
        .with_status(TaskStatus::Running)
        .started_at(Utc::now() - Duration::minutes(20))
        .build();
    store.create_task(&fresh).await.unwrap();
    store.create_task(&old).await.unwrap();

    let detector = StallDetector::new(store.clone());
    let stalled = detector
        .find_stalled(TaskStatus::Running, TaskStatus::Scheduled, Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(stalled, vec![old.id]);
}

#[tokio::test]
async fn test_scheduled_task_classification() {
    let store = Arc::new(InMemoryStore::new());
    let old = TaskBuilder::new("s1", "c1")
        .created_at(Utc::now() - Duration::minutes(10))
        .build();
    let recent = TaskBuilder::new("s1", "c2").build();
    let finished = TaskBuilder::new("s1", "c3")
        .with_status(TaskStatus::Success)
        .created_at(Utc::now() - Duration::hours(2))
        .build();
    for task in [&old, &recent, &finished] {
        store.create_task(task).await.unwrap();
    }

    let detector = StallDetector::new(store.clone());
    let stalled = detector
        .find_stalled(TaskStatus::Running, TaskStatus::Scheduled, Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(stalled, vec![old.id]);
}

#[tokio::test]
async fn test_detector_does_not_mutate_tasks() {
    let store = Arc::new(InMemoryStore::new());
    let old = TaskBuilder::new("s1", "c1")
        .created_at(Utc::now() - Duration::minutes(10))
        .build();
    store.create_task(&old).await.unwrap();

    let detector = StallDetector::new(store.clone());
    detector
        .find_stalled(TaskStatus::Running, TaskStatus::Scheduled, Duration::minutes(5))
        .await
        .unwrap();

    let reloaded = store.get_task(&old.id).await.unwrap().unwrap();
    assert_eq!(reloaded, old);
}

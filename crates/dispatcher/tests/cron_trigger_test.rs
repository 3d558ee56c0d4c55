use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use syncer_core::config::SchedulerConfig;
use syncer_core::{Priority, SyncError, TaskFilter, TaskStatus, TimeInterval};
use syncer_dispatcher::{CronTrigger, FireCallback, SyncScheduler, TaskService};
use syncer_testing_utils::{
    native_source, MockNativeDriver, RecordingStorage, SyncFixture, TestEnv,
};

#[tokio::test]
async fn test_schedule_is_unique_per_collection() {
    let trigger = CronTrigger::new();

    trigger.schedule("s1", "c1", "* * * * *").await.unwrap();
    let err = trigger.schedule("s1", "c1", "* * * * *").await.unwrap_err();
    match err {
        SyncError::ScheduleExists { next, prev, .. } => {
            assert!(!next.is_empty());
            assert!(!prev.is_empty());
        }
        other => panic!("expected ScheduleExists, got {other:?}"),
    }
    assert_eq!(trigger.len().await, 1);

    trigger.schedule("s1", "c2", "@hourly").await.unwrap();
    assert_eq!(trigger.len().await, 2);
    trigger.close().await;
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let trigger = CronTrigger::new();
    trigger.schedule("s1", "c1", "0 * * * *").await.unwrap();
    assert!(trigger.next_fire("s1", "c1").await.is_some());

    trigger.remove("s1", "c1").await;
    trigger.remove("s1", "c1").await;
    assert!(!trigger.is_scheduled("s1", "c1").await);

    trigger.schedule("s1", "c1", "0 * * * *").await.unwrap();
    assert!(trigger.is_scheduled("s1", "c1").await);
    trigger.close().await;
}

#[tokio::test]
async fn test_invalid_spec_is_rejected() {
    let trigger = CronTrigger::new();
    assert!(matches!(
        trigger.schedule("s1", "c1", "not a cron").await,
        Err(SyncError::InvalidCron { .. })
    ));
    assert!(trigger.is_empty().await);
}

#[tokio::test]
async fn test_start_twice_fails() {
    let trigger = CronTrigger::new();
    let callback: FireCallback =
        Arc::new(|_: String, _: String, _: u32| -> BoxFuture<'static, ()> {
            Box::pin(async {})
        });
    trigger.start(callback.clone()).unwrap();
    assert!(trigger.start(callback).is_err());
}

#[tokio::test]
async fn test_fires_callback_with_zero_retries() {
    let trigger = CronTrigger::new();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    let callback: FireCallback = Arc::new(
        move |source: String, collection: String, retry: u32| -> BoxFuture<'static, ()> {
            sink.lock().unwrap().push((source, collection, retry));
            Box::pin(async {})
        },
    );
    trigger.start(callback).unwrap();
    trigger.schedule("s1", "c1", "* * * * * *").await.unwrap();

    let observed = fired.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let observed = observed.clone();
                async move { !observed.lock().unwrap().is_empty() }
            },
            Duration::from_secs(3),
        )
        .await
    );
    trigger.close().await;

    let calls = fired.lock().unwrap().clone();
    assert_eq!(calls[0], ("s1".to_string(), "c1".to_string(), 0));
}

#[tokio::test]
async fn test_closed_trigger_stops_firing() {
    let trigger = CronTrigger::new();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let callback: FireCallback = Arc::new(move |_: String, _: String, _: u32| -> BoxFuture<'static, ()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    });
    trigger.start(callback).unwrap();
    trigger.schedule("s1", "c1", "* * * * * *").await.unwrap();
    trigger.close().await;

    let before = count.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(count.load(Ordering::SeqCst), before);
    assert!(trigger.is_empty().await);
}

#[tokio::test]
async fn test_scheduled_fire_creates_high_priority_task() {
    let fixture = SyncFixture::new();
    let driver = MockNativeDriver::new().with_interval(TimeInterval::all(), vec![]);
    fixture
        .add_source(native_source("acme", "users", Arc::new(driver), &["dst"]))
        .add_storage(Arc::new(RecordingStorage::new("dst")), true);

    let service = Arc::new(TaskService::new(
        fixture.sources.clone(),
        fixture.destinations.clone(),
        fixture.task_store.clone(),
        fixture.coordination.clone(),
    ));
    let scheduler = SyncScheduler::new(service.clone(), SchedulerConfig::default());
    scheduler.start().unwrap();
    scheduler.schedule("acme", "users", "0 * * * *").await.unwrap();

    scheduler
        .clone()
        .scheduled_sync("acme".to_string(), "users".to_string(), 0)
        .await;

    let tasks = service
        .list_tasks(&TaskFilter::for_collection("acme", "users"))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Scheduled);
    assert_eq!(tasks[0].priority, Priority::High.score(tasks[0].created_at));

    scheduler
        .clone()
        .scheduled_sync("acme".to_string(), "users".to_string(), 0)
        .await;
    let tasks = service
        .list_tasks(&TaskFilter::for_collection("acme", "users"))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);

    scheduler.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_fire_is_retried_with_growing_delay() {
    let fixture = SyncFixture::new();
    let service = Arc::new(TaskService::new(
        fixture.sources.clone(),
        fixture.destinations.clone(),
        fixture.task_store.clone(),
        fixture.coordination.clone(),
    ));
    let scheduler = SyncScheduler::new(
        service.clone(),
        SchedulerConfig {
            retry_delay_seconds: 60,
            ..SchedulerConfig::default()
        },
    );

    scheduler
        .clone()
        .scheduled_sync("late".to_string(), "users".to_string(), 0)
        .await;

    let driver = MockNativeDriver::new().with_interval(TimeInterval::all(), vec![]);
    fixture.add_source(native_source("late", "users", Arc::new(driver), &[]));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(fixture.task_store.all_task_ids().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    let tasks = service
        .list_tasks(&TaskFilter::for_collection("late", "users"))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    scheduler.close().await;
}

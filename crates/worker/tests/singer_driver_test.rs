#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use syncer_core::{ExternalDriver, SyncError, TaskLogger, TaskStore};
use syncer_infrastructure::InMemoryStore;
use syncer_worker::SingerDriver;
use tokio_util::sync::CancellationToken;

fn shell(script: &str) -> SingerDriver {
    SingerDriver::new("sh", &["-c".to_string(), script.to_string()])
}

fn logger() -> (Arc<InMemoryStore>, TaskLogger) {
    let store = Arc::new(InMemoryStore::new());
    let logger = TaskLogger::new("singer-task", store.clone());
    (store, logger)
}

#[tokio::test]
async fn test_singer_output_is_collected() {
    let driver = shell(
        r#"
echo '{"type":"SCHEMA","stream":"users","schema":{},"key_properties":["id"]}'
echo '{"type":"RECORD","stream":"users","record":{"id":1}}'
echo '{"type":"RECORD","stream":"users","record":{"id":2}}'
echo '{"type":"STATE","value":{"users":2}}'
echo 'fetched 2 users' >&2
"#,
    );
    let (store, logger) = logger();

    let output = driver
        .load(None, &logger, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.streams.len(), 1);
    assert_eq!(output.streams[0].key_fields, vec!["id".to_string()]);
    assert_eq!(output.streams[0].records.len(), 2);
    assert_eq!(output.state.as_deref(), Some(r#"{"users":2}"#));

    let logs = store.list_logs("singer-task", None, None).await.unwrap();
    assert!(logs
        .iter()
        .any(|log| log.system == "[CONNECTOR]" && log.message == "fetched 2 users"));
}

#[tokio::test]
async fn test_previous_state_is_passed_as_file() {
    // `sh -c script --state <file>` binds the file path to $1
    let driver = shell(r#"printf '{"type":"STATE","value":%s}\n' "$(cat "$1")""#);
    let (_store, logger) = logger();

    let output = driver
        .load(Some(r#"{"cursor":41}"#), &logger, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.state.as_deref(), Some(r#"{"cursor":41}"#));
}

#[tokio::test]
async fn test_non_zero_exit_fails() {
    let driver = shell("echo 'auth failed' >&2; exit 3");
    let (_store, logger) = logger();

    let result = driver.load(None, &logger, CancellationToken::new()).await;
    assert!(matches!(result, Err(SyncError::Execution(_))));
}

#[tokio::test]
async fn test_missing_command_fails() {
    let driver = SingerDriver::new("/nonexistent/tap-missing", &[]);
    let (_store, logger) = logger();

    let result = driver.load(None, &logger, CancellationToken::new()).await;
    assert!(matches!(result, Err(SyncError::Execution(_))));
}

#[tokio::test]
async fn test_cancellation_kills_process() {
    let driver = shell("sleep 30");
    let (_store, logger) = logger();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = driver.load(None, &logger, cancel).await;
    assert!(matches!(result, Err(SyncError::Canceled { .. })));
    assert!(started.elapsed() < Duration::from_secs(10));
}

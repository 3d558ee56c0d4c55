//! Mock implementations of the collaborator traits
//!
//! Drivers, storages and notifiers record every call so tests can assert
//! on what the executor did. `FaultyStore` wraps the in-memory store and
//! fails selected writes or serves stale reads for fault-injection tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use syncer_core::{
    BatchHeader, ExternalDriver, ExternalOutput, LockBackend, NativeDriver, Record, Storage,
    SyncError, SyncNotifier, SyncResult, SyncStateStore, Task, TaskFilter, TaskLogRecord,
    TaskLogger, TaskStatus, TaskStore, TimeInterval,
};
use syncer_infrastructure::{InMemoryLockBackend, InMemoryStore};
use tokio_util::sync::CancellationToken;

/// Mock native driver serving fixed intervals
#[derive(Debug, Clone)]
pub struct MockNativeDriver {
    intervals: Vec<TimeInterval>,
    objects: HashMap<String, Vec<Record>>,
    refresh_window: Duration,
    error: Option<String>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockNativeDriver {
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
            objects: HashMap::new(),
            refresh_window: Duration::zero(),
            error: None,
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_interval(mut self, interval: TimeInterval, records: Vec<Record>) -> Self {
        self.objects.insert(interval.key(), records);
        self.intervals.push(interval);
        self
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    /// Every fetch fails with the given message
    pub fn failing(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }

    /// Interval keys passed to `objects_for`
    pub fn fetched_intervals(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Default for MockNativeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NativeDriver for MockNativeDriver {
    fn kind(&self) -> &str {
        "mock_native"
    }

    async fn available_intervals(&self) -> SyncResult<Vec<TimeInterval>> {
        Ok(self.intervals.clone())
    }

    fn refresh_window(&self) -> Duration {
        self.refresh_window
    }

    async fn objects_for(&self, interval: &TimeInterval) -> SyncResult<Vec<Record>> {
        self.fetched.lock().unwrap().push(interval.key());
        if let Some(message) = &self.error {
            return Err(SyncError::execution(message.clone()));
        }
        Ok(self.objects.get(&interval.key()).cloned().unwrap_or_default())
    }
}

/// Mock external-process driver returning a canned output
#[derive(Debug, Clone, Default)]
pub struct MockExternalDriver {
    output: ExternalOutput,
    error: Option<String>,
    delay: Option<StdDuration>,
    received_states: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockExternalDriver {
    pub fn new(output: ExternalOutput) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Wait before returning, or until cancelled
    pub fn with_delay(mut self, delay: StdDuration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// States handed to `load`, in call order
    pub fn received_states(&self) -> Vec<Option<String>> {
        self.received_states.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalDriver for MockExternalDriver {
    fn kind(&self) -> &str {
        "mock_external"
    }

    async fn load(
        &self,
        state: Option<&str>,
        logger: &TaskLogger,
        cancel: CancellationToken,
    ) -> SyncResult<ExternalOutput> {
        self.received_states
            .lock()
            .unwrap()
            .push(state.map(String::from));
        logger.info("mock connector started").await;

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SyncError::Canceled { task_id: logger.task_id().to_string() });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        match &self.error {
            Some(message) => Err(SyncError::execution(message.clone())),
            None => Ok(self.output.clone()),
        }
    }
}

/// A single observed write
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub header: BatchHeader,
    pub records: Vec<Record>,
    pub interval_tag: Option<String>,
}

/// Storage that keeps every write in memory
#[derive(Debug, Clone)]
pub struct RecordingStorage {
    id: String,
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
    error: Arc<Mutex<Option<String>>>,
}

impl RecordingStorage {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            writes: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.error.lock().unwrap() = Some(message.to_string());
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn record_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.records.len())
            .sum()
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write(
        &self,
        header: &BatchHeader,
        records: &[Record],
        interval_tag: Option<&str>,
    ) -> SyncResult<()> {
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(SyncError::Destination {
                id: self.id.clone(),
                message,
            });
        }
        self.writes.lock().unwrap().push(RecordedWrite {
            header: header.clone(),
            records: records.to_vec(),
            interval_tag: interval_tag.map(String::from),
        });
        Ok(())
    }
}

/// Notifier that remembers every notification
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    calls: Arc<Mutex<Vec<(String, TaskStatus, Vec<String>)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, TaskStatus, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncNotifier for RecordingNotifier {
    async fn notify(
        &self,
        task: &Task,
        status: TaskStatus,
        destination_ids: &[String],
    ) -> SyncResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((task.id.clone(), status, destination_ids.to_vec()));
        Ok(())
    }
}

/// Lock backend whose every call fails, simulating an unreachable store
#[derive(Debug, Default)]
pub struct UnavailableLockBackend;

#[async_trait]
impl LockBackend for UnavailableLockBackend {
    async fn try_lock(&self, _name: &str, _holder: &str, _lease: StdDuration) -> SyncResult<bool> {
        Err(SyncError::lock("lock backend unavailable"))
    }

    async fn extend(&self, _name: &str, _holder: &str, _lease: StdDuration) -> SyncResult<bool> {
        Err(SyncError::lock("lock backend unavailable"))
    }

    async fn unlock(&self, _name: &str, _holder: &str) -> SyncResult<bool> {
        Err(SyncError::lock("lock backend unavailable"))
    }

    async fn is_locked(&self, _name: &str) -> SyncResult<bool> {
        Err(SyncError::lock("lock backend unavailable"))
    }
}

/// In-memory lock backend where every lease renewal finds the lock
/// already taken over by another node
#[derive(Debug, Default)]
pub struct TakenOverLockBackend {
    inner: InMemoryLockBackend,
}

impl TakenOverLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for TakenOverLockBackend {
    async fn try_lock(&self, name: &str, holder: &str, lease: StdDuration) -> SyncResult<bool> {
        self.inner.try_lock(name, holder, lease).await
    }

    async fn extend(&self, _name: &str, _holder: &str, _lease: StdDuration) -> SyncResult<bool> {
        Ok(false)
    }

    async fn unlock(&self, name: &str, holder: &str) -> SyncResult<bool> {
        self.inner.unlock(name, holder).await
    }

    async fn is_locked(&self, name: &str) -> SyncResult<bool> {
        self.inner.is_locked(name).await
    }
}

/// In-memory store that can be told to fail status writes for a status
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_upsert_for: Mutex<Vec<TaskStatus>>,
    stale_reads: Mutex<HashMap<String, Task>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes of tasks in `status` return a store error
    pub fn fail_upsert_for(&self, status: TaskStatus) {
        self.fail_upsert_for.lock().unwrap().push(status);
    }

    /// The next `get_task` for `task.id` returns this copy instead of the stored one,
    /// as if another node changed the record right after the read
    pub fn stale_read(&self, task: Task) {
        self.stale_reads.lock().unwrap().insert(task.id.clone(), task);
    }

    fn check_write(&self, task: &Task) -> SyncResult<()> {
        if self.fail_upsert_for.lock().unwrap().contains(&task.status) {
            return Err(SyncError::store(format!(
                "injected failure persisting {}",
                task.status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FaultyStore {
    async fn create_task(&self, task: &Task) -> SyncResult<()> {
        self.inner.create_task(task).await
    }

    async fn upsert_task(&self, task: &Task) -> SyncResult<()> {
        self.check_write(task)?;
        self.inner.upsert_task(task).await
    }

    async fn transition_task(&self, task: &Task) -> SyncResult<bool> {
        self.check_write(task)?;
        self.inner.transition_task(task).await
    }

    async fn get_task(&self, id: &str) -> SyncResult<Option<Task>> {
        if let Some(stale) = self.stale_reads.lock().unwrap().remove(id) {
            return Ok(Some(stale));
        }
        self.inner.get_task(id).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> SyncResult<Vec<Task>> {
        self.inner.list_tasks(filter).await
    }

    async fn get_last_task(&self, source: &str, collection: &str) -> SyncResult<Option<Task>> {
        self.inner.get_last_task(source, collection).await
    }

    async fn remove_tasks(&self, ids: &[String]) -> SyncResult<usize> {
        self.inner.remove_tasks(ids).await
    }

    async fn append_log(&self, task_id: &str, record: &TaskLogRecord) -> SyncResult<()> {
        self.inner.append_log(task_id, record).await
    }

    async fn list_logs(
        &self,
        task_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<TaskLogRecord>> {
        self.inner.list_logs(task_id, start, end).await
    }

    async fn last_log(&self, task_id: &str) -> SyncResult<Option<TaskLogRecord>> {
        self.inner.last_log(task_id).await
    }

    async fn push_task(&self, task: &Task) -> SyncResult<()> {
        self.inner.push_task(task).await
    }

    async fn poll_task(&self) -> SyncResult<Option<Task>> {
        self.inner.poll_task().await
    }

    async fn queued_task_for(
        &self,
        source: &str,
        collection: &str,
    ) -> SyncResult<Option<String>> {
        self.inner.queued_task_for(source, collection).await
    }

    async fn queue_len(&self) -> SyncResult<usize> {
        self.inner.queue_len().await
    }

    async fn heartbeat(&self, task_id: &str, at: DateTime<Utc>) -> SyncResult<()> {
        self.inner.heartbeat(task_id, at).await
    }

    async fn clear_heartbeat(&self, task_id: &str) -> SyncResult<()> {
        self.inner.clear_heartbeat(task_id).await
    }

    async fn list_heartbeats(&self) -> SyncResult<HashMap<String, DateTime<Utc>>> {
        self.inner.list_heartbeats().await
    }

    async fn all_task_ids(&self) -> SyncResult<Vec<String>> {
        self.inner.all_task_ids().await
    }
}

#[async_trait]
impl SyncStateStore for FaultyStore {
    async fn get_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
    ) -> SyncResult<Option<String>> {
        self.inner.get_signature(source, collection, interval_key).await
    }

    async fn save_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
        signature: &str,
    ) -> SyncResult<()> {
        self.inner
            .save_signature(source, collection, interval_key, signature)
            .await
    }

    async fn save_config_snapshot(
        &self,
        source: &str,
        config: &serde_json::Value,
    ) -> SyncResult<()> {
        self.inner.save_config_snapshot(source, config).await
    }

    async fn get_config_snapshot(&self, source: &str) -> SyncResult<Option<serde_json::Value>> {
        self.inner.get_config_snapshot(source).await
    }
}

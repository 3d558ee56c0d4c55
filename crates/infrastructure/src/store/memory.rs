use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use syncer_core::priority::queue_score;
use syncer_core::{
    SyncError, SyncResult, SyncStateStore, Task, TaskFilter, TaskLogRecord, TaskStore,
};

/// 内存共享存储实现
///
/// 所有操作在同一把互斥锁内完成，因此 `poll_task` 与 `push_task` 天然原子。
/// 队列分数见 [`queue_score`]，同一毫秒创建的同档位任务按入队顺序出队。
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<String, Task>,
    logs: HashMap<String, Vec<TaskLogRecord>>,
    index: HashMap<(String, String), Vec<(DateTime<Utc>, String)>>,
    queue: BTreeSet<(i64, Reverse<u64>, String)>,
    queue_seq: u64,
    heartbeats: HashMap<String, DateTime<Utc>>,
    signatures: HashMap<(String, String, String), String>,
    config_snapshots: HashMap<String, serde_json::Value>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> SyncResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|e| SyncError::store(format!("内存存储锁已损坏: {e}")))
    }
}

fn in_range(time: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.map_or(true, |s| time >= s) && end.map_or(true, |e| time <= e)
}

fn apply_limit(mut tasks: Vec<Task>, limit: Option<usize>) -> Vec<Task> {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    match limit {
        Some(limit) if tasks.len() > limit => tasks.split_off(tasks.len() - limit),
        _ => tasks,
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &Task) -> SyncResult<()> {
        let mut state = self.state()?;
        state.tasks.insert(task.id.clone(), task.clone());
        let entries = state
            .index
            .entry((task.source.clone(), task.collection.clone()))
            .or_default();
        entries.push((task.created_at, task.id.clone()));
        entries.sort();
        Ok(())
    }

    async fn upsert_task(&self, task: &Task) -> SyncResult<()> {
        let mut state = self.state()?;
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn transition_task(&self, task: &Task) -> SyncResult<bool> {
        let mut state = self.state()?;
        match state.tasks.get_mut(&task.id) {
            Some(stored) if stored.status.can_transition_to(task.status) => {
                *stored = task.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_task(&self, id: &str) -> SyncResult<Option<Task>> {
        Ok(self.state()?.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> SyncResult<Vec<Task>> {
        let state = self.state()?;
        let tasks = state
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        Ok(apply_limit(tasks, filter.limit))
    }

    async fn get_last_task(&self, source: &str, collection: &str) -> SyncResult<Option<Task>> {
        let state = self.state()?;
        let last_id = state
            .index
            .get(&(source.to_string(), collection.to_string()))
            .and_then(|entries| entries.last())
            .map(|(_, id)| id.clone());
        Ok(last_id.and_then(|id| state.tasks.get(&id).cloned()))
    }

    async fn remove_tasks(&self, ids: &[String]) -> SyncResult<usize> {
        let mut state = self.state()?;
        let mut removed = 0;
        for id in ids {
            if let Some(task) = state.tasks.remove(id) {
                removed += 1;
                if let Some(entries) = state
                    .index
                    .get_mut(&(task.source.clone(), task.collection.clone()))
                {
                    entries.retain(|(_, task_id)| task_id != id);
                }
            }
            state.logs.remove(id);
            state.heartbeats.remove(id);
            state.queue.retain(|(_, _, task_id)| task_id != id);
        }
        Ok(removed)
    }

    async fn append_log(&self, task_id: &str, record: &TaskLogRecord) -> SyncResult<()> {
        let mut state = self.state()?;
        let logs = state.logs.entry(task_id.to_string()).or_default();
        let position = logs.partition_point(|existing| existing.time <= record.time);
        logs.insert(position, record.clone());
        Ok(())
    }

    async fn list_logs(
        &self,
        task_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<TaskLogRecord>> {
        let state = self.state()?;
        Ok(state
            .logs
            .get(task_id)
            .map(|logs| {
                logs.iter()
                    .filter(|record| in_range(record.time, start, end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last_log(&self, task_id: &str) -> SyncResult<Option<TaskLogRecord>> {
        let state = self.state()?;
        Ok(state.logs.get(task_id).and_then(|logs| logs.last().cloned()))
    }

    async fn push_task(&self, task: &Task) -> SyncResult<()> {
        let mut state = self.state()?;
        state.queue_seq += 1;
        let seq = state.queue_seq;
        let score = queue_score(task.priority, task.created_at);
        state.queue.insert((score, Reverse(seq), task.id.clone()));
        Ok(())
    }

    async fn poll_task(&self) -> SyncResult<Option<Task>> {
        let mut state = self.state()?;
        while let Some((_, _, task_id)) = state.queue.pop_last() {
            if let Some(task) = state.tasks.get(&task_id) {
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    async fn queued_task_for(
        &self,
        source: &str,
        collection: &str,
    ) -> SyncResult<Option<String>> {
        let state = self.state()?;
        Ok(state
            .queue
            .iter()
            .filter_map(|(_, _, id)| state.tasks.get(id))
            .find(|task| task.source == source && task.collection == collection)
            .map(|task| task.id.clone()))
    }

    async fn queue_len(&self) -> SyncResult<usize> {
        Ok(self.state()?.queue.len())
    }

    async fn heartbeat(&self, task_id: &str, at: DateTime<Utc>) -> SyncResult<()> {
        self.state()?.heartbeats.insert(task_id.to_string(), at);
        Ok(())
    }

    async fn clear_heartbeat(&self, task_id: &str) -> SyncResult<()> {
        self.state()?.heartbeats.remove(task_id);
        Ok(())
    }

    async fn list_heartbeats(&self) -> SyncResult<HashMap<String, DateTime<Utc>>> {
        Ok(self.state()?.heartbeats.clone())
    }

    async fn all_task_ids(&self) -> SyncResult<Vec<String>> {
        Ok(self.state()?.tasks.keys().cloned().collect())
    }
}

#[async_trait]
impl SyncStateStore for InMemoryStore {
    async fn get_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
    ) -> SyncResult<Option<String>> {
        let state = self.state()?;
        Ok(state
            .signatures
            .get(&(
                source.to_string(),
                collection.to_string(),
                interval_key.to_string(),
            ))
            .cloned())
    }

    async fn save_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
        signature: &str,
    ) -> SyncResult<()> {
        self.state()?.signatures.insert(
            (
                source.to_string(),
                collection.to_string(),
                interval_key.to_string(),
            ),
            signature.to_string(),
        );
        Ok(())
    }

    async fn save_config_snapshot(
        &self,
        source: &str,
        config: &serde_json::Value,
    ) -> SyncResult<()> {
        self.state()?
            .config_snapshots
            .insert(source.to_string(), config.clone());
        Ok(())
    }

    async fn get_config_snapshot(&self, source: &str) -> SyncResult<Option<serde_json::Value>> {
        Ok(self.state()?.config_snapshots.get(source).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};
    use syncer_core::{LogLevel, Priority, TaskStatus};

    #[tokio::test]
    async fn test_poll_returns_highest_tier_first() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let low = Task::new("s1", "a", Priority::Low, now);
        let high = Task::new("s1", "b", Priority::High, now);

        for task in [&low, &high] {
            store.create_task(task).await.unwrap();
            store.push_task(task).await.unwrap();
        }

        assert_eq!(store.poll_task().await.unwrap().unwrap().id, high.id);
        assert_eq!(store.poll_task().await.unwrap().unwrap().id, low.id);
        assert!(store.poll_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_is_fifo_within_tier() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let first = Task::new("s1", "a", Priority::High, now - Duration::seconds(10));
        let second = Task::new("s1", "b", Priority::High, now);

        for task in [&second, &first] {
            store.create_task(task).await.unwrap();
            store.push_task(task).await.unwrap();
        }

        assert_eq!(store.poll_task().await.unwrap().unwrap().id, first.id);
        assert_eq!(store.poll_task().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_poll_orders_tasks_created_in_same_second() {
        let store = InMemoryStore::new();
        let second = Utc::now().with_nanosecond(0).unwrap();
        let earlier = Task::new("s1", "a", Priority::High, second + Duration::milliseconds(100));
        let later = Task::new("s1", "b", Priority::High, second + Duration::milliseconds(900));
        assert_eq!(earlier.priority, later.priority);

        for task in [&later, &earlier] {
            store.create_task(task).await.unwrap();
            store.push_task(task).await.unwrap();
        }

        assert_eq!(store.poll_task().await.unwrap().unwrap().id, earlier.id);
        assert_eq!(store.poll_task().await.unwrap().unwrap().id, later.id);
    }

    #[tokio::test]
    async fn test_transition_task_rejects_backward_moves() {
        let store = InMemoryStore::new();
        let task = Task::new("s1", "c1", Priority::High, Utc::now());
        store.create_task(&task).await.unwrap();

        let mut canceled = task.clone();
        canceled.transition(TaskStatus::Canceled, Utc::now()).unwrap();
        assert!(store.transition_task(&canceled).await.unwrap());

        let mut running = task.clone();
        running.transition(TaskStatus::Running, Utc::now()).unwrap();
        assert!(!store.transition_task(&running).await.unwrap());

        let persisted = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, TaskStatus::Canceled);
        assert!(persisted.started_at.is_none());

        let unknown = Task::new("s1", "c2", Priority::Low, Utc::now());
        assert!(!store.transition_task(&unknown).await.unwrap());
        assert!(store.get_task(&unknown.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_does_not_reorder_queue() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let a = Task::new("s1", "a", Priority::High, now - Duration::seconds(5));
        let mut b = Task::new("s1", "b", Priority::Low, now);
        for task in [&a, &b] {
            store.create_task(task).await.unwrap();
            store.push_task(task).await.unwrap();
        }

        b.priority = Priority::Now.score(now);
        store.upsert_task(&b).await.unwrap();

        assert_eq!(store.poll_task().await.unwrap().unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_queue_membership() {
        let store = InMemoryStore::new();
        let task = Task::new("s1", "c1", Priority::High, Utc::now());
        store.create_task(&task).await.unwrap();

        assert!(store.queued_task_for("s1", "c1").await.unwrap().is_none());
        store.push_task(&task).await.unwrap();
        assert_eq!(
            store.queued_task_for("s1", "c1").await.unwrap(),
            Some(task.id.clone())
        );
        assert!(store.queued_task_for("s1", "c2").await.unwrap().is_none());

        store.poll_task().await.unwrap();
        assert!(store.queued_task_for("s1", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_task_and_listing() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let older = Task::new("s1", "c1", Priority::Low, now - Duration::minutes(5));
        let newer = Task::new("s1", "c1", Priority::Low, now);
        store.create_task(&newer).await.unwrap();
        store.create_task(&older).await.unwrap();

        let last = store.get_last_task("s1", "c1").await.unwrap().unwrap();
        assert_eq!(last.id, newer.id);

        let mut filter = TaskFilter::for_collection("s1", "c1");
        filter.limit = Some(1);
        let tasks = store.list_tasks(&filter).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, newer.id);

        filter.limit = None;
        filter.status = Some(TaskStatus::Running);
        assert!(store.list_tasks(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_cascades_to_logs() {
        let store = InMemoryStore::new();
        let task = Task::new("s1", "c1", Priority::Low, Utc::now());
        store.create_task(&task).await.unwrap();
        store.push_task(&task).await.unwrap();
        store
            .append_log(&task.id, &TaskLogRecord::new("[SYNC]", LogLevel::Info, "hello"))
            .await
            .unwrap();

        let removed = store.remove_tasks(&[task.id.clone()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_task(&task.id).await.unwrap().is_none());
        assert!(store.list_logs(&task.id, None, None).await.unwrap().is_empty());
        assert!(store.get_last_task("s1", "c1").await.unwrap().is_none());
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_logs_are_time_ordered_and_ranged() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut early = TaskLogRecord::new("[SYNC]", LogLevel::Info, "early");
        early.time = now - Duration::minutes(10);
        let mut late = TaskLogRecord::new("[SYNC]", LogLevel::Info, "late");
        late.time = now;

        store.append_log("t1", &late).await.unwrap();
        store.append_log("t1", &early).await.unwrap();

        let logs = store.list_logs("t1", None, None).await.unwrap();
        assert_eq!(logs[0].message, "early");
        assert_eq!(store.last_log("t1").await.unwrap().unwrap().message, "late");

        let ranged = store
            .list_logs("t1", Some(now - Duration::minutes(1)), None)
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeats() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.heartbeat("t1", now).await.unwrap();
        assert_eq!(store.list_heartbeats().await.unwrap().get("t1"), Some(&now));
        store.clear_heartbeat("t1").await.unwrap();
        assert!(store.list_heartbeats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signatures() {
        let store = InMemoryStore::new();
        assert!(store.get_signature("s1", "c1", "ALL").await.unwrap().is_none());
        store.save_signature("s1", "c1", "ALL", "sig").await.unwrap();
        assert_eq!(
            store.get_signature("s1", "c1", "ALL").await.unwrap(),
            Some("sig".to_string())
        );
        assert!(store.get_signature("s1", "c2", "ALL").await.unwrap().is_none());
    }
}

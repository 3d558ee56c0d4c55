use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use syncer_core::priority::queue_score;
use syncer_core::{
    SyncError, SyncResult, SyncStateStore, Task, TaskFilter, TaskLogRecord, TaskStatus, TaskStore,
};
use tracing::{debug, warn};

use super::keys::{
    chunks_key, config_snapshot_key, queued_tasks_key, task_id_from_key, task_index_key, task_key,
    task_logs_key, HEARTBEAT_KEY, PRIORITY_QUEUE_KEY, TASK_KEY_PATTERN,
};
use crate::redis_connection::RedisConnectionManager;

const SCAN_BATCH: usize = 1000;

// ARGV: 允许的前序状态个数, 前序状态..., 字段和值...
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call("HGET", KEYS[1], "status")
if not current then
    return 0
end
local allowed = tonumber(ARGV[1])
for i = 2, allowed + 1 do
    if ARGV[i] == current then
        redis.call("HSET", KEYS[1], unpack(ARGV, allowed + 2))
        return 1
    end
end
return 0
"#;

// KEYS[1]: 二级索引, KEYS[2]: 优先级队列。顺带清理已出队的残留成员
const QUEUED_TASK_SCRIPT: &str = r#"
for _, id in ipairs(redis.call("SMEMBERS", KEYS[1])) do
    if redis.call("ZSCORE", KEYS[2], id) then
        return id
    end
    redis.call("SREM", KEYS[1], id)
end
return false
"#;

/// Redis 共享存储
///
/// - 任务记录: `sync_tasks#<id>` 哈希
/// - 任务日志: `sync_tasks#<id>:logs` 有序集合，分数为毫秒时间戳
/// - 创建时间索引: `sync_tasks_index:source#<s>:collection#<c>` 有序集合
/// - 优先级队列: `sync_tasks_priority_queue` 有序集合，`ZPOPMAX` 原子出队，
///   分数见 [`queue_score`]
/// - 排队索引: `sync_tasks_queued:source#<s>:collection#<c>` 集合
/// - 任务心跳: `sync_tasks_heartbeat` 哈希
///
/// 状态迁移通过脚本在服务端比较 `status` 字段后写入。
#[derive(Clone)]
pub struct RedisStore {
    connection: RedisConnectionManager,
    transition_script: Script,
    queued_task_script: Script,
}

impl RedisStore {
    pub fn new(connection: RedisConnectionManager) -> Self {
        Self {
            connection,
            transition_script: Script::new(TRANSITION_SCRIPT),
            queued_task_script: Script::new(QUEUED_TASK_SCRIPT),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.connection()
    }

    fn task_fields(task: &Task) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("id", task.id.clone()),
            ("source", task.source.clone()),
            ("collection", task.collection.clone()),
            ("priority", task.priority.to_string()),
            ("created_at", task.created_at.to_rfc3339()),
            ("status", task.status.as_str().to_string()),
        ];
        if let Some(started_at) = task.started_at {
            fields.push(("started_at", started_at.to_rfc3339()));
        }
        if let Some(finished_at) = task.finished_at {
            fields.push(("finished_at", finished_at.to_rfc3339()));
        }
        fields
    }

    fn parse_task(fields: HashMap<String, String>) -> SyncResult<Option<Task>> {
        if fields.is_empty() {
            return Ok(None);
        }
        let get = |name: &str| -> SyncResult<&String> {
            fields
                .get(name)
                .ok_or_else(|| SyncError::Serialization(format!("任务记录缺少字段: {name}")))
        };
        let parse_time = |name: &str| -> SyncResult<Option<DateTime<Utc>>> {
            match fields.get(name).filter(|v| !v.is_empty()) {
                Some(value) => Ok(Some(
                    DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc),
                )),
                None => Ok(None),
            }
        };

        let priority = get("priority")?
            .parse::<i64>()
            .map_err(|e| SyncError::Serialization(format!("无效的任务优先级: {e}")))?;
        let created_at = parse_time("created_at")?
            .ok_or_else(|| SyncError::Serialization("任务记录缺少创建时间".to_string()))?;

        Ok(Some(Task {
            id: get("id")?.clone(),
            source: get("source")?.clone(),
            collection: get("collection")?.clone(),
            priority,
            created_at,
            started_at: parse_time("started_at")?,
            finished_at: parse_time("finished_at")?,
            status: get("status")?.parse::<TaskStatus>()?,
        }))
    }

    async fn write_task(&self, task: &Task) -> SyncResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("HSET")
            .arg(task_key(&task.id))
            .arg(Self::task_fields(task))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn load_tasks(&self, ids: &[String]) -> SyncResult<Vec<Task>> {
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.get_task(id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    fn score_bound(time: Option<DateTime<Utc>>, default: &str) -> String {
        time.map(|t| t.timestamp_millis().to_string())
            .unwrap_or_else(|| default.to_string())
    }
}

#[async_trait]
impl TaskStore for RedisStore {
    async fn create_task(&self, task: &Task) -> SyncResult<()> {
        self.write_task(task).await?;
        let mut conn = self.conn();
        let _: () = redis::cmd("ZADD")
            .arg(task_index_key(&task.source, &task.collection))
            .arg(task.created_at.timestamp_millis())
            .arg(&task.id)
            .query_async(&mut conn)
            .await?;
        debug!("任务已保存: {}", task.id);
        Ok(())
    }

    async fn upsert_task(&self, task: &Task) -> SyncResult<()> {
        self.write_task(task).await
    }

    async fn transition_task(&self, task: &Task) -> SyncResult<bool> {
        let allowed_from: Vec<&str> = TaskStatus::ALL
            .iter()
            .filter(|status| status.can_transition_to(task.status))
            .map(|status| status.as_str())
            .collect();
        let mut conn = self.conn();
        let written: i32 = self
            .transition_script
            .key(task_key(&task.id))
            .arg(allowed_from.len())
            .arg(allowed_from)
            .arg(Self::task_fields(task))
            .invoke_async(&mut conn)
            .await?;
        if written != 1 {
            debug!(task.id = %task.id, task.status = %task.status, "状态迁移被拒绝");
        }
        Ok(written == 1)
    }

    async fn get_task(&self, id: &str) -> SyncResult<Option<Task>> {
        let mut conn = self.conn();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(task_key(id))
            .query_async(&mut conn)
            .await?;
        Self::parse_task(fields)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> SyncResult<Vec<Task>> {
        let ids = match (&filter.source, &filter.collection) {
            (Some(source), Some(collection)) => {
                let mut conn = self.conn();
                redis::cmd("ZRANGEBYSCORE")
                    .arg(task_index_key(source, collection))
                    .arg(Self::score_bound(filter.start, "-inf"))
                    .arg(Self::score_bound(filter.end, "+inf"))
                    .query_async::<Vec<String>>(&mut conn)
                    .await?
            }
            _ => self.all_task_ids().await?,
        };

        let mut tasks: Vec<Task> = self
            .load_tasks(&ids)
            .await?
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            if tasks.len() > limit {
                tasks = tasks.split_off(tasks.len() - limit);
            }
        }
        Ok(tasks)
    }

    async fn get_last_task(&self, source: &str, collection: &str) -> SyncResult<Option<Task>> {
        let mut conn = self.conn();
        let ids: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(task_index_key(source, collection))
            .arg(0)
            .arg(0)
            .query_async(&mut conn)
            .await?;
        match ids.first() {
            Some(id) => self.get_task(id).await,
            None => Ok(None),
        }
    }

    async fn remove_tasks(&self, ids: &[String]) -> SyncResult<usize> {
        let mut removed = 0;
        for id in ids {
            let Some(task) = self.get_task(id).await? else {
                continue;
            };
            let mut conn = self.conn();
            let mut pipe = redis::pipe();
            pipe.atomic()
                .cmd("DEL")
                .arg(task_key(id))
                .ignore()
                .cmd("DEL")
                .arg(task_logs_key(id))
                .ignore()
                .cmd("ZREM")
                .arg(task_index_key(&task.source, &task.collection))
                .arg(id)
                .ignore()
                .cmd("ZREM")
                .arg(PRIORITY_QUEUE_KEY)
                .arg(id)
                .ignore()
                .cmd("SREM")
                .arg(queued_tasks_key(&task.source, &task.collection))
                .arg(id)
                .ignore()
                .cmd("HDEL")
                .arg(HEARTBEAT_KEY)
                .arg(id)
                .ignore();
            let _: () = pipe.query_async(&mut conn).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn append_log(&self, task_id: &str, record: &TaskLogRecord) -> SyncResult<()> {
        let member = serde_json::to_string(record)?;
        let mut conn = self.conn();
        let _: () = redis::cmd("ZADD")
            .arg(task_logs_key(task_id))
            .arg(record.time.timestamp_millis())
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_logs(
        &self,
        task_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<TaskLogRecord>> {
        let mut conn = self.conn();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(task_logs_key(task_id))
            .arg(Self::score_bound(start, "-inf"))
            .arg(Self::score_bound(end, "+inf"))
            .query_async(&mut conn)
            .await?;
        members
            .iter()
            .map(|member| serde_json::from_str(member).map_err(SyncError::from))
            .collect()
    }

    async fn last_log(&self, task_id: &str) -> SyncResult<Option<TaskLogRecord>> {
        let mut conn = self.conn();
        let members: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(task_logs_key(task_id))
            .arg(0)
            .arg(0)
            .query_async(&mut conn)
            .await?;
        match members.first() {
            Some(member) => Ok(Some(serde_json::from_str(member)?)),
            None => Ok(None),
        }
    }

    async fn push_task(&self, task: &Task) -> SyncResult<()> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZADD")
            .arg(PRIORITY_QUEUE_KEY)
            .arg(queue_score(task.priority, task.created_at))
            .arg(&task.id)
            .ignore()
            .cmd("SADD")
            .arg(queued_tasks_key(&task.source, &task.collection))
            .arg(&task.id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn poll_task(&self) -> SyncResult<Option<Task>> {
        loop {
            let mut conn = self.conn();
            let popped: Vec<String> = redis::cmd("ZPOPMAX")
                .arg(PRIORITY_QUEUE_KEY)
                .arg(1)
                .query_async(&mut conn)
                .await?;
            let Some(task_id) = popped.first() else {
                return Ok(None);
            };
            match self.get_task(task_id).await? {
                Some(task) => {
                    let _: () = redis::cmd("SREM")
                        .arg(queued_tasks_key(&task.source, &task.collection))
                        .arg(&task.id)
                        .query_async(&mut conn)
                        .await?;
                    return Ok(Some(task));
                }
                None => warn!("队列中的任务记录不存在，已丢弃: {}", task_id),
            }
        }
    }

    async fn queued_task_for(
        &self,
        source: &str,
        collection: &str,
    ) -> SyncResult<Option<String>> {
        let mut conn = self.conn();
        let task_id: Option<String> = self
            .queued_task_script
            .key(queued_tasks_key(source, collection))
            .key(PRIORITY_QUEUE_KEY)
            .invoke_async(&mut conn)
            .await?;
        Ok(task_id)
    }

    async fn queue_len(&self) -> SyncResult<usize> {
        let mut conn = self.conn();
        let len: usize = redis::cmd("ZCARD")
            .arg(PRIORITY_QUEUE_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn heartbeat(&self, task_id: &str, at: DateTime<Utc>) -> SyncResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("HSET")
            .arg(HEARTBEAT_KEY)
            .arg(task_id)
            .arg(at.to_rfc3339())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear_heartbeat(&self, task_id: &str) -> SyncResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("HDEL")
            .arg(HEARTBEAT_KEY)
            .arg(task_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_heartbeats(&self) -> SyncResult<HashMap<String, DateTime<Utc>>> {
        let mut conn = self.conn();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(HEARTBEAT_KEY)
            .query_async(&mut conn)
            .await?;
        let mut heartbeats = HashMap::with_capacity(raw.len());
        for (task_id, value) in raw {
            match DateTime::parse_from_rfc3339(&value) {
                Ok(at) => {
                    heartbeats.insert(task_id, at.with_timezone(&Utc));
                }
                Err(e) => warn!("无效的任务心跳 {}: {}", task_id, e),
            }
        }
        Ok(heartbeats)
    }

    async fn all_task_ids(&self) -> SyncResult<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut ids = Vec::new();
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(TASK_KEY_PATTERN)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            ids.extend(keys.iter().filter_map(|k| task_id_from_key(k).map(String::from)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl SyncStateStore for RedisStore {
    async fn get_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
    ) -> SyncResult<Option<String>> {
        let mut conn = self.conn();
        let signature: Option<String> = redis::cmd("HGET")
            .arg(chunks_key(source, collection))
            .arg(interval_key)
            .query_async(&mut conn)
            .await?;
        Ok(signature)
    }

    async fn save_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
        signature: &str,
    ) -> SyncResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("HSET")
            .arg(chunks_key(source, collection))
            .arg(interval_key)
            .arg(signature)
            .query_async(&mut conn)
            .await?;
        debug!("区间签名已保存: {}.{} {}", source, collection, interval_key);
        Ok(())
    }

    async fn save_config_snapshot(
        &self,
        source: &str,
        config: &serde_json::Value,
    ) -> SyncResult<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(config_snapshot_key(source))
            .arg(serde_json::to_string(config)?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_config_snapshot(&self, source: &str) -> SyncResult<Option<serde_json::Value>> {
        let mut conn = self.conn();
        let raw: Option<String> = redis::cmd("GET")
            .arg(config_snapshot_key(source))
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use syncer_core::Priority;

    #[test]
    fn test_task_hash_round_trip() {
        let mut task = Task::new("s1", "c1", Priority::High, Utc::now());
        task.transition(TaskStatus::Running, Utc::now()).unwrap();

        let fields: HashMap<String, String> = RedisStore::task_fields(&task)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert!(!fields.contains_key("finished_at"));

        let parsed = RedisStore::parse_task(fields).unwrap().unwrap();
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.status, TaskStatus::Running);
        assert_eq!(parsed.priority, task.priority);
        assert_eq!(
            parsed.started_at.map(|t| t.timestamp_millis()),
            task.started_at.map(|t| t.timestamp_millis())
        );
        assert!(parsed.finished_at.is_none());
    }

    #[test]
    fn test_empty_hash_is_missing_task() {
        assert!(RedisStore::parse_task(HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_score_bounds() {
        assert_eq!(RedisStore::score_bound(None, "-inf"), "-inf");
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert_eq!(RedisStore::score_bound(Some(t), "+inf"), "1700000000000");
    }
}

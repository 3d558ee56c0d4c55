use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Task, TaskFilter, TaskLogRecord};
use crate::SyncResult;

/// 任务存储抽象接口
///
/// 共享存储上的任务记录、任务日志、按 (source, collection) 的创建时间索引、
/// 全局优先级队列和任务心跳。`push_task`/`poll_task` 之间必须是原子的：
/// 两个轮询者不能拿到同一个任务。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 保存新任务并写入时间索引
    async fn create_task(&self, task: &Task) -> SyncResult<()>;

    /// 更新状态与时间戳，不影响优先级队列
    async fn upsert_task(&self, task: &Task) -> SyncResult<()>;

    /// 按状态迁移规则保存任务
    ///
    /// 比较与写入在存储端原子完成：持久化的状态不能迁移到 `task.status`
    /// 或任务不存在时不写入，返回 `false`。
    async fn transition_task(&self, task: &Task) -> SyncResult<bool>;

    async fn get_task(&self, id: &str) -> SyncResult<Option<Task>>;

    /// 按创建时间升序返回，`limit` 取最新的若干条
    async fn list_tasks(&self, filter: &TaskFilter) -> SyncResult<Vec<Task>>;

    /// 某个 (source, collection) 最近创建的任务
    async fn get_last_task(&self, source: &str, collection: &str) -> SyncResult<Option<Task>>;

    /// 删除任务及其日志，返回实际删除的数量
    async fn remove_tasks(&self, ids: &[String]) -> SyncResult<usize>;

    async fn append_log(&self, task_id: &str, record: &TaskLogRecord) -> SyncResult<()>;

    async fn list_logs(
        &self,
        task_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<TaskLogRecord>>;

    async fn last_log(&self, task_id: &str) -> SyncResult<Option<TaskLogRecord>>;

    /// 放入优先级队列，同分数按创建时间的毫秒部分先后出队
    async fn push_task(&self, task: &Task) -> SyncResult<()>;

    /// 原子地取出分数最高的任务
    async fn poll_task(&self) -> SyncResult<Option<Task>>;

    /// 返回排队中属于该 (source, collection) 的任务ID
    async fn queued_task_for(&self, source: &str, collection: &str)
        -> SyncResult<Option<String>>;

    async fn queue_len(&self) -> SyncResult<usize>;

    async fn heartbeat(&self, task_id: &str, at: DateTime<Utc>) -> SyncResult<()>;

    async fn clear_heartbeat(&self, task_id: &str) -> SyncResult<()>;

    async fn list_heartbeats(&self) -> SyncResult<HashMap<String, DateTime<Utc>>>;

    /// 所有已持久化任务的ID，用于停滞扫描
    async fn all_task_ids(&self) -> SyncResult<Vec<String>>;
}

/// 增量同步状态存储
///
/// 每个区间的签名以及外部进程连接器的可恢复状态（保存在 `ALL` 区间键下），
/// 另外保存连接器更新后的配置快照，使集群中其它节点看到同样的配置。
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
    ) -> SyncResult<Option<String>>;

    async fn save_signature(
        &self,
        source: &str,
        collection: &str,
        interval_key: &str,
        signature: &str,
    ) -> SyncResult<()>;

    async fn save_config_snapshot(&self, source: &str, config: &serde_json::Value)
        -> SyncResult<()>;

    async fn get_config_snapshot(&self, source: &str) -> SyncResult<Option<serde_json::Value>>;
}

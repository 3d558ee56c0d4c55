use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use syncer_core::models::{creation_lock_name, execution_lock_name};
use syncer_core::{
    DestinationCatalog, Priority, SourceCatalog, SourceUnit, SyncError, SyncResult, Task,
    TaskFilter, TaskLogRecord, TaskLogger, TaskStatus, TaskStore,
};
use syncer_infrastructure::{CoordinationService, StructuredLogger};
use tracing::{debug, info};

/// 同步任务服务
///
/// 负责创建任务并保证同一个 (source, collection) 不会被重复调度：
/// 创建锁阻止并发的创建者，执行锁和队列成员检查阻止与正在执行或
/// 排队中的任务重复。
pub struct TaskService {
    sources: Arc<dyn SourceCatalog>,
    destinations: Arc<dyn DestinationCatalog>,
    store: Arc<dyn TaskStore>,
    coordination: CoordinationService,
}

impl TaskService {
    pub fn new(
        sources: Arc<dyn SourceCatalog>,
        destinations: Arc<dyn DestinationCatalog>,
        store: Arc<dyn TaskStore>,
        coordination: CoordinationService,
    ) -> Self {
        Self {
            sources,
            destinations,
            store,
            coordination,
        }
    }

    /// 创建同步任务并放入优先级队列，返回新任务ID
    pub async fn sync(
        &self,
        source_id: &str,
        collection: &str,
        priority: Priority,
    ) -> SyncResult<String> {
        let source = self
            .sources
            .get_source(source_id)
            .ok_or_else(|| SyncError::SourceNotFound {
                id: source_id.to_string(),
            })?;

        let mut creation_lock = self
            .coordination
            .create_lock(&creation_lock_name(source_id, collection));
        if !creation_lock.try_acquire(Duration::ZERO).await? {
            return Err(SyncError::AlreadyStarting {
                source_id: source_id.to_string(),
                collection: collection.to_string(),
            });
        }

        let result = self.create_task(&source, collection, priority).await;
        creation_lock.release().await;
        result
    }

    async fn create_task(
        &self,
        source: &SourceUnit,
        collection: &str,
        priority: Priority,
    ) -> SyncResult<String> {
        let source_id = source.id.as_str();

        if self
            .coordination
            .is_locked(&execution_lock_name(source_id, collection))
            .await?
        {
            let last = self.store.get_last_task(source_id, collection).await?;
            return match last {
                Some(task) if task.status == TaskStatus::Running => {
                    Err(SyncError::AlreadySyncing { task_id: task.id })
                }
                Some(task) => Err(SyncError::Internal(format!(
                    "{source_id}.{collection} 的执行锁被持有，但最近的任务 {} 状态为 {}",
                    task.id, task.status
                ))),
                None => Err(SyncError::Internal(format!(
                    "{source_id}.{collection} 的执行锁被持有，但没有任何任务记录"
                ))),
            };
        }

        if let Some(task_id) = self.store.queued_task_for(source_id, collection).await? {
            return Err(SyncError::AlreadySyncing { task_id });
        }

        self.validate_collection(source, collection)?;

        let task = Task::new(source_id, collection, priority, Utc::now());
        self.store.create_task(&task).await?;
        self.store.push_task(&task).await?;

        StructuredLogger::log_task_created(&task.id, source_id, collection, task.priority);
        Ok(task.id)
    }

    fn validate_collection(&self, source: &SourceUnit, collection: &str) -> SyncResult<()> {
        if source.driver(collection).is_none() {
            return Err(SyncError::CollectionNotFound {
                source_id: source.id.clone(),
                collection: collection.to_string(),
            });
        }
        for destination_id in &source.destination_ids {
            match self.destinations.get_ready_storage(destination_id) {
                Some((_, true)) => {}
                _ => {
                    return Err(SyncError::DestinationNotReady {
                        id: destination_id.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// 取消任务
    ///
    /// 排队中的任务在被执行器取出时直接跳过；执行中的任务由执行器在下一次
    /// 写入目标存储前发现并停止。状态在读取之后被其他节点改为终态时返回
    /// `InvalidTransition`，不会覆盖已有的结果。
    pub async fn cancel(&self, task_id: &str) -> SyncResult<Task> {
        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| SyncError::task_not_found(task_id))?;

        let from = task.status;
        task.transition(TaskStatus::Canceled, Utc::now())?;
        if !self.store.transition_task(&task).await? {
            let current = self
                .store
                .get_task(task_id)
                .await?
                .map_or(from, |persisted| persisted.status);
            return Err(SyncError::InvalidTransition {
                from: current,
                to: TaskStatus::Canceled,
            });
        }

        TaskLogger::new(task_id, self.store.clone())
            .warn("任务已被取消")
            .await;
        info!(task.id = task_id, "任务已取消");
        Ok(task)
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SyncResult<Vec<Task>> {
        self.store.list_tasks(filter).await
    }

    pub async fn get_task(&self, task_id: &str) -> SyncResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| SyncError::task_not_found(task_id))
    }

    pub async fn task_logs(
        &self,
        task_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<TaskLogRecord>> {
        if self.store.get_task(task_id).await?.is_none() {
            return Err(SyncError::task_not_found(task_id));
        }
        let logs = self.store.list_logs(task_id, start, end).await?;
        debug!(task.id = task_id, "读取到 {} 条任务日志", logs.len());
        Ok(logs)
    }
}

use std::sync::Arc;

use chrono::Utc;
use syncer_core::{SyncResult, Task, TaskLogger, TaskStatus, TaskStore};
use syncer_infrastructure::{StructuredLogger, SyncMetrics};
use tracing::debug;

/// 以终态结束任务
///
/// 通过 [`TaskStore::transition_task`] 写入，持久化的状态已经是终态时
/// （例如执行期间被取消）不会覆盖，返回 `false` 并把本地副本更新为持久化的版本。
#[derive(Clone)]
pub struct TaskCloser {
    store: Arc<dyn TaskStore>,
    metrics: SyncMetrics,
}

impl TaskCloser {
    pub fn new(store: Arc<dyn TaskStore>, metrics: SyncMetrics) -> Self {
        Self { store, metrics }
    }

    pub async fn close(
        &self,
        task: &mut Task,
        status: TaskStatus,
        error_message: Option<&str>,
        logger: &TaskLogger,
    ) -> SyncResult<bool> {
        if task.status.is_terminal() {
            return Ok(false);
        }

        let mut closed = task.clone();
        closed.transition(status, Utc::now())?;
        if !self.store.transition_task(&closed).await? {
            if let Some(persisted) = self.store.get_task(&task.id).await? {
                debug!(
                    task.id = %task.id,
                    task.status = %persisted.status,
                    "任务已处于终态，不再覆盖"
                );
                *task = persisted;
            }
            return Ok(false);
        }
        *task = closed;
        if let Some(message) = error_message {
            logger.error(message).await;
        }

        StructuredLogger::log_task_finished(
            &task.id,
            task.status.as_str(),
            task.started_at,
            error_message,
        );
        self.metrics
            .record_task_finished(&task.source, task.status.as_str(), duration_seconds(task));
        Ok(true)
    }
}

pub(crate) fn duration_seconds(task: &Task) -> f64 {
    match (task.started_at, task.finished_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    }
}

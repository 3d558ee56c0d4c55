use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::models::{LogLevel, TaskLogRecord, SYSTEM_CONNECTOR, SYSTEM_SYNC};
use crate::traits::TaskStore;

/// 绑定到单个任务的日志记录器
///
/// 每条记录写入任务存储，同时输出到本进程日志。写任务日志失败只记录到进程日志，
/// 不影响任务本身。
#[derive(Clone)]
pub struct TaskLogger {
    task_id: String,
    store: Arc<dyn TaskStore>,
}

impl TaskLogger {
    pub fn new(task_id: &str, store: Arc<dyn TaskStore>) -> Self {
        Self {
            task_id: task_id.to_string(),
            store,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.write(SYSTEM_SYNC, LogLevel::Info, message.into()).await
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.write(SYSTEM_SYNC, LogLevel::Warn, message.into()).await
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.write(SYSTEM_SYNC, LogLevel::Error, message.into()).await
    }

    /// 连接器自身输出的日志
    pub async fn connector(&self, level: LogLevel, message: impl Into<String>) {
        self.write(SYSTEM_CONNECTOR, level, message.into()).await
    }

    async fn write(&self, system: &str, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => debug!(task.id = %self.task_id, system, "{}", message),
            LogLevel::Info => info!(task.id = %self.task_id, system, "{}", message),
            LogLevel::Warn => warn!(task.id = %self.task_id, system, "{}", message),
            LogLevel::Error => error!(task.id = %self.task_id, system, "{}", message),
        }

        let record = TaskLogRecord::new(system, level, message);
        if let Err(e) = self.store.append_log(&self.task_id, &record).await {
            error!(task.id = %self.task_id, "写入任务日志失败: {}", e);
        }
    }
}

impl std::fmt::Debug for TaskLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLogger")
            .field("task_id", &self.task_id)
            .finish()
    }
}

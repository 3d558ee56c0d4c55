use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use syncer_core::{TaskStatus, TaskStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 任务执行期间的心跳
///
/// 按固定间隔写入 `sync_tasks_heartbeat`，同时检查任务是否已被外部取消，
/// 发现取消时触发 `on_cancel`。与锁的续约相互独立。
pub struct TaskHeartbeat {
    store: Arc<dyn TaskStore>,
    task_id: String,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TaskHeartbeat {
    pub fn start(
        store: Arc<dyn TaskStore>,
        task_id: &str,
        interval: Duration,
        on_cancel: CancellationToken,
    ) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(Self::run(
            store.clone(),
            task_id.to_string(),
            interval,
            stop.clone(),
            on_cancel,
        ));
        Self {
            store,
            task_id: task_id.to_string(),
            stop,
            handle: Some(handle),
        }
    }

    async fn run(
        store: Arc<dyn TaskStore>,
        task_id: String,
        interval: Duration,
        stop: CancellationToken,
        on_cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(e) = store.heartbeat(&task_id, Utc::now()).await {
                warn!(task.id = %task_id, "写入任务心跳失败: {}", e);
            }
            match store.get_task(&task_id).await {
                Ok(Some(task)) if task.status == TaskStatus::Canceled => {
                    debug!(task.id = %task_id, "心跳检测到任务已取消");
                    on_cancel.cancel();
                }
                Ok(_) => {}
                Err(e) => warn!(task.id = %task_id, "读取任务状态失败: {}", e),
            }
        }
    }

    /// 停止心跳并清除心跳记录
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if let Err(e) = self.store.clear_heartbeat(&self.task_id).await {
            warn!(task.id = %self.task_id, "清除任务心跳失败: {}", e);
        }
    }
}

impl Drop for TaskHeartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

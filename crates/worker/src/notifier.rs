use async_trait::async_trait;
use syncer_core::{SyncNotifier, SyncResult, Task, TaskStatus};
use tracing::info;

/// 默认通知渠道，只把同步结果写入进程日志
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SyncNotifier for LogNotifier {
    async fn notify(
        &self,
        task: &Task,
        status: TaskStatus,
        destination_ids: &[String],
    ) -> SyncResult<()> {
        for destination in destination_ids {
            info!(
                event = "sync_notification",
                task.id = %task.id,
                source = %task.source,
                collection = %task.collection,
                status = %status,
                destination = %destination,
                "发送同步结果通知"
            );
        }
        Ok(())
    }
}

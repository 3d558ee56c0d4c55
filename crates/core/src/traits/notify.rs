use async_trait::async_trait;

use crate::models::{Task, TaskStatus};
use crate::SyncResult;

/// 同步结果通知渠道
#[async_trait]
pub trait SyncNotifier: Send + Sync {
    /// 向后处理目标发送同步结果
    async fn notify(
        &self,
        task: &Task,
        status: TaskStatus,
        destination_ids: &[String],
    ) -> SyncResult<()>;
}

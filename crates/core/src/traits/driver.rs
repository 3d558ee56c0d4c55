use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio_util::sync::CancellationToken;

use crate::logging::TaskLogger;
use crate::models::{ExternalOutput, Record, TimeInterval};
use crate::SyncResult;

/// 原生增量连接器
#[async_trait]
pub trait NativeDriver: Send + Sync {
    fn kind(&self) -> &str;

    async fn available_intervals(&self) -> SyncResult<Vec<TimeInterval>>;

    /// 在该窗口内结束的区间被视为可能过期，需要重新检查
    fn refresh_window(&self) -> Duration;

    async fn objects_for(&self, interval: &TimeInterval) -> SyncResult<Vec<Record>>;
}

/// 外部进程连接器，输出结构化数据流和可恢复状态
#[async_trait]
pub trait ExternalDriver: Send + Sync {
    fn kind(&self) -> &str;

    async fn load(
        &self,
        state: Option<&str>,
        logger: &TaskLogger,
        cancel: CancellationToken,
    ) -> SyncResult<ExternalOutput>;
}

/// 集合连接器，在数据源构建时选定类型
#[derive(Clone)]
pub enum CollectionDriver {
    External(Arc<dyn ExternalDriver>),
    Native(Arc<dyn NativeDriver>),
}

impl CollectionDriver {
    pub fn kind(&self) -> &str {
        match self {
            CollectionDriver::External(driver) => driver.kind(),
            CollectionDriver::Native(driver) => driver.kind(),
        }
    }
}

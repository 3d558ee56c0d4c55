use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use syncer_core::config::{SchedulerConfig, SourceConfig};
use syncer_core::{Priority, SyncResult};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cron_trigger::{CronTrigger, FireCallback};
use crate::task_service::TaskService;

/// 定时同步调度器
///
/// 把定时触发器和任务服务连接起来。触发失败（冲突除外）时提交一个延迟的
/// 重试任务，第 n 次重试延迟 `n * retry_delay_seconds`，不阻塞触发器。
pub struct SyncScheduler {
    trigger: CronTrigger,
    service: Arc<TaskService>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl SyncScheduler {
    pub fn new(service: Arc<TaskService>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            trigger: CronTrigger::new(),
            service,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// 启动触发器，回调持有弱引用
    pub fn start(self: &Arc<Self>) -> SyncResult<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let callback: FireCallback = Arc::new(
            move |source: String, collection: String, retry_count: u32| -> BoxFuture<'static, ()> {
                match weak.upgrade() {
                    Some(scheduler) => scheduler.scheduled_sync(source, collection, retry_count),
                    None => Box::pin(async {}),
                }
            },
        );
        self.trigger.start(callback)
    }

    pub async fn schedule(&self, source: &str, collection: &str, spec: &str) -> SyncResult<()> {
        self.trigger.schedule(source, collection, spec).await
    }

    pub async fn unschedule(&self, source: &str, collection: &str) {
        self.trigger.remove(source, collection).await
    }

    /// 按配置注册所有带调度的集合，返回注册的数量
    pub async fn schedule_sources(&self, sources: &[SourceConfig]) -> SyncResult<usize> {
        let mut count = 0;
        for source in sources {
            for collection in &source.collections {
                if let Some(spec) = collection.schedule.as_deref().filter(|s| !s.is_empty()) {
                    self.schedule(&source.id, &collection.name, spec).await?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    pub fn trigger(&self) -> &CronTrigger {
        &self.trigger
    }

    /// 定时触发的同步
    pub fn scheduled_sync(
        self: Arc<Self>,
        source: String,
        collection: String,
        retry_count: u32,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match self.service.sync(&source, &collection, Priority::High).await {
                Ok(task_id) => {
                    info!(
                        source = %source,
                        collection = %collection,
                        task.id = %task_id,
                        "定时同步任务已创建"
                    );
                }
                Err(e) if e.is_conflict() => {
                    info!(source = %source, collection = %collection, "跳过定时同步: {}", e);
                }
                Err(e) if retry_count < self.config.max_retries => {
                    let attempt = retry_count + 1;
                    let delay =
                        Duration::from_secs(self.config.retry_delay_seconds * u64::from(attempt));
                    warn!(
                        source = %source,
                        collection = %collection,
                        "定时同步失败，{}秒后第{}次重试: {}",
                        delay.as_secs(),
                        attempt,
                        e
                    );
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {
                                self.scheduled_sync(source, collection, attempt).await;
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(
                        source = %source,
                        collection = %collection,
                        "定时同步在重试{}次后仍然失败: {}",
                        retry_count,
                        e
                    );
                }
            }
        })
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        self.trigger.close().await;
    }
}

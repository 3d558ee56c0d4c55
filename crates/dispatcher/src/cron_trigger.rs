use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use syncer_core::{SyncError, SyncResult};
use syncer_infrastructure::{supervise, RestartPolicy};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cron_utils::CronScheduler;

/// 触发回调，参数为 (source, collection, retry_count)
pub type FireCallback = Arc<dyn Fn(String, String, u32) -> BoxFuture<'static, ()> + Send + Sync>;

type EntryKey = (String, String);

struct CronEntry {
    scheduler: Arc<CronScheduler>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 定时触发器
///
/// 每个 (source, collection) 最多一条调度，唯一性由触发器自身的映射保证。
/// 每条调度由一个受监督的定时任务驱动，到点后把回调派发到独立任务中执行，
/// 回调耗时不会推迟下一次触发。
pub struct CronTrigger {
    entries: RwLock<HashMap<EntryKey, CronEntry>>,
    on_fire: Arc<OnceLock<FireCallback>>,
    cancel: CancellationToken,
}

impl CronTrigger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            on_fire: Arc::new(OnceLock::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// 注册触发回调，只能调用一次
    pub fn start(&self, on_fire: FireCallback) -> SyncResult<()> {
        self.on_fire
            .set(on_fire)
            .map_err(|_| SyncError::Internal("定时触发器已经启动".to_string()))?;
        info!("定时触发器已启动");
        Ok(())
    }

    pub async fn schedule(&self, source: &str, collection: &str, spec: &str) -> SyncResult<()> {
        let key = (source.to_string(), collection.to_string());
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&key) {
            let now = Utc::now();
            return Err(SyncError::ScheduleExists {
                source_id: source.to_string(),
                collection: collection.to_string(),
                next: format_time(existing.scheduler.next_execution_time(now)),
                prev: format_time(existing.scheduler.previous_execution_time(now)),
            });
        }

        let scheduler = Arc::new(CronScheduler::new(spec)?);
        let cancel = self.cancel.child_token();
        let handle = self.spawn_entry(key.clone(), scheduler.clone(), cancel.clone());
        entries.insert(
            key,
            CronEntry {
                scheduler,
                cancel,
                handle,
            },
        );
        info!(source, collection, schedule = spec, "已添加定时同步");
        Ok(())
    }

    /// 删除调度，不存在时直接返回
    pub async fn remove(&self, source: &str, collection: &str) {
        let key = (source.to_string(), collection.to_string());
        if let Some(entry) = self.entries.write().await.remove(&key) {
            entry.cancel.cancel();
            entry.handle.abort();
            info!(source, collection, "已删除定时同步");
        }
    }

    pub async fn is_scheduled(&self, source: &str, collection: &str) -> bool {
        self.entries
            .read()
            .await
            .contains_key(&(source.to_string(), collection.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 下一次触发时间
    pub async fn next_fire(&self, source: &str, collection: &str) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .await
            .get(&(source.to_string(), collection.to_string()))
            .and_then(|entry| entry.scheduler.next_execution_time(Utc::now()))
    }

    /// 停止所有调度
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            entry.handle.abort();
        }
        info!("定时触发器已关闭");
    }

    fn spawn_entry(
        &self,
        key: EntryKey,
        scheduler: Arc<CronScheduler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let on_fire = self.on_fire.clone();
        supervise("cron_entry", cancel, RestartPolicy::default(), move |token| {
            let key = key.clone();
            let scheduler = scheduler.clone();
            let on_fire = on_fire.clone();
            async move {
                loop {
                    let now = Utc::now();
                    let Some(next) = scheduler.next_execution_time(now) else {
                        warn!(source = %key.0, collection = %key.1, "没有后续的触发时间");
                        return;
                    };
                    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(wait) => {}
                    }

                    match on_fire.get() {
                        Some(callback) => {
                            debug!(source = %key.0, collection = %key.1, "定时触发");
                            tokio::spawn(callback(key.0.clone(), key.1.clone(), 0));
                        }
                        None => warn!(
                            source = %key.0,
                            collection = %key.1,
                            "定时触发器尚未启动，跳过本次触发"
                        ),
                    }
                }
            }
        })
    }
}

impl Default for CronTrigger {
    fn default() -> Self {
        Self::new()
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

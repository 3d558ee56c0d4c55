use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use syncer_core::config::StallConfig;
use syncer_core::{SyncResult, Task, TaskStatus, TaskStore};
use syncer_infrastructure::{supervise, RestartPolicy, StructuredLogger};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 停滞任务检测
///
/// 只负责识别，不修改任何任务状态；重新入队或判定失败由外部恢复流程决定。
#[derive(Clone)]
pub struct StallDetector {
    store: Arc<dyn TaskStore>,
}

impl StallDetector {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub async fn find_stalled(
        &self,
        running_status: TaskStatus,
        scheduled_status: TaskStatus,
        threshold: Duration,
    ) -> SyncResult<Vec<String>> {
        self.find_stalled_at(running_status, scheduled_status, threshold, Utc::now())
            .await
    }

    pub async fn find_stalled_at(
        &self,
        running_status: TaskStatus,
        scheduled_status: TaskStatus,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> SyncResult<Vec<String>> {
        let deadline = now - threshold;
        let mut stalled = Vec::new();

        for task_id in self.store.all_task_ids().await? {
            let Some(task) = self.store.get_task(&task_id).await? else {
                continue;
            };
            let last_activity = if task.status == running_status {
                let last_log = self.store.last_log(&task.id).await?;
                last_log.map(|record| record.time).or(task.started_at)
            } else if task.status == scheduled_status {
                Some(task.created_at)
            } else {
                continue;
            };

            if is_stalled(&task, last_activity, deadline) {
                stalled.push(task.id);
            }
        }

        stalled.sort();
        Ok(stalled)
    }

    /// 周期扫描并记录停滞任务
    pub fn start_scanner(&self, config: &StallConfig, cancel: CancellationToken) -> JoinHandle<()> {
        let detector = self.clone();
        let threshold = Duration::seconds(config.threshold_seconds as i64);
        let interval = StdDuration::from_secs(config.scan_interval_seconds);

        supervise("stall_scanner", cancel, RestartPolicy::default(), move |token| {
            let detector = detector.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = ticker.tick() => {}
                    }
                    match detector
                        .find_stalled(TaskStatus::Running, TaskStatus::Scheduled, threshold)
                        .await
                    {
                        Ok(stalled) if stalled.is_empty() => debug!("没有停滞的任务"),
                        Ok(stalled) => {
                            for task_id in &stalled {
                                warn!(event = "task_stalled", task.id = %task_id, "检测到停滞任务");
                            }
                        }
                        Err(e) => StructuredLogger::log_system_error("stall_detector", "scan", &e),
                    }
                }
            }
        })
    }
}

/// 没有任何活动时间的任务无法判断，视为未停滞
fn is_stalled(task: &Task, last_activity: Option<DateTime<Utc>>, deadline: DateTime<Utc>) -> bool {
    match last_activity {
        Some(at) => at < deadline,
        None => {
            debug!(task.id = %task.id, "任务没有活动时间，跳过");
            false
        }
    }
}

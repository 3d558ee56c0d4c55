//! 周期循环的监督执行
//!
//! 循环体发生 panic 时记录错误并在退避后重新启动，直到取消令牌触发。

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 重启策略，每次重启的退避时间翻倍并附加最多 10% 的随机抖动
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub first_backoff: Duration,
    pub max_backoff: Duration,
}

impl RestartPolicy {
    fn with_jitter(backoff: Duration) -> Duration {
        let max_jitter = (backoff.as_millis() / 10) as u64;
        if max_jitter == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            first_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// 在后台运行 `make_loop` 产生的循环
///
/// 循环正常返回即视为结束；panic 时按策略退避后重建循环。
/// 取消令牌触发后不再重启，并等待当前循环自行退出。
pub fn supervise<F, Fut>(
    name: &'static str,
    cancel: CancellationToken,
    policy: RestartPolicy,
    make_loop: F,
) -> JoinHandle<()>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = policy.first_backoff;
        loop {
            let handle = tokio::spawn(make_loop(cancel.clone()));
            match handle.await {
                Ok(()) => {
                    debug!(component = name, "循环已退出");
                    return;
                }
                Err(e) if e.is_panic() => {
                    error!(component = name, "循环发生panic，{:?}后重启", backoff);
                }
                Err(e) => {
                    error!(component = name, "循环被中止: {}", e);
                    return;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(component = name, "已取消，不再重启");
                    return;
                }
                _ = tokio::time::sleep(RestartPolicy::with_jitter(backoff)) => {}
            }
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    })
}

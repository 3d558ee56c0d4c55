use std::sync::Arc;
use std::time::Duration;

use syncer_core::config::CoordinationConfig;
use syncer_core::{LockBackend, SyncError, SyncResult};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::service::HeldLocks;
use crate::observability::StructuredLogger;

/// 租约锁
///
/// `try_acquire(Duration::ZERO)` 只尝试一次；否则在超时时间内平均分布
/// `acquire_retries` 次尝试。获取成功后后台任务每半个租约续约一次，
/// `release` 停止续约并带重试地删除锁记录。全部重试失败时只记录系统错误，
/// 锁会在租约到期后自然失效。
///
/// 续约发现锁已被其他节点持有时，锁被标记为丢失并移出持有登记，
/// 通过 [`LeasedLock::cancel_on_loss`] 登记的令牌同时被触发。
pub struct LeasedLock {
    name: String,
    holder: String,
    lease: Duration,
    backend: Arc<dyn LockBackend>,
    config: CoordinationConfig,
    registry: Arc<HeldLocks>,
    renewal: Option<JoinHandle<()>>,
    held: bool,
    lost: CancellationToken,
    on_loss: Option<CancellationToken>,
}

impl LeasedLock {
    pub(crate) fn new(
        name: &str,
        holder: String,
        lease: Duration,
        backend: Arc<dyn LockBackend>,
        config: CoordinationConfig,
        registry: Arc<HeldLocks>,
    ) -> Self {
        Self {
            name: name.to_string(),
            holder,
            lease,
            backend,
            config,
            registry,
            renewal: None,
            held: false,
            lost: CancellationToken::new(),
            on_loss: None,
        }
    }

    /// 丢失租约时一并触发 `token`
    pub fn cancel_on_loss(mut self, token: CancellationToken) -> Self {
        self.on_loss = Some(token);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.held && !self.is_lost()
    }

    /// 持有期间续约发现锁已被其他节点持有
    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// 获取锁，未获取到返回 `Ok(false)`；只有后端不可用时返回错误
    pub async fn try_acquire(&mut self, timeout: Duration) -> SyncResult<bool> {
        if self.held {
            return Ok(true);
        }

        let attempts = if timeout.is_zero() {
            1
        } else {
            self.config.acquire_retries.max(1)
        };
        let delay = timeout / attempts;

        for attempt in 0..attempts {
            if self
                .backend
                .try_lock(&self.name, &self.holder, self.lease)
                .await?
            {
                self.on_acquired();
                debug!(lock = %self.name, "获取锁成功");
                return Ok(true);
            }
            if attempt + 1 < attempts {
                sleep(delay).await;
            }
        }

        trace!(lock = %self.name, "未能获取锁");
        Ok(false)
    }

    fn on_acquired(&mut self) {
        self.held = true;
        self.lost = CancellationToken::new();
        let renewal = self.spawn_renewal();
        self.registry
            .register(&self.holder, &self.name, Some(renewal.abort_handle()));
        self.renewal = Some(renewal);
    }

    fn spawn_renewal(&self) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let name = self.name.clone();
        let holder = self.holder.clone();
        let lease = self.lease;
        let interval = (lease / 2).max(Duration::from_millis(1));
        let lost = self.lost.clone();
        let on_loss = self.on_loss.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                match backend.extend(&name, &holder, lease).await {
                    Ok(true) => trace!(lock = %name, "续约成功"),
                    Ok(false) => {
                        warn!(lock = %name, "锁已不属于本进程，停止续约");
                        lost.cancel();
                        if let Some(token) = &on_loss {
                            token.cancel();
                        }
                        registry.deregister(&holder);
                        break;
                    }
                    Err(e) => warn!(lock = %name, "续约失败: {}", e),
                }
            }
        })
    }

    /// 立即延长租约
    pub async fn extend(&self) -> SyncResult<bool> {
        if !self.held {
            return Ok(false);
        }
        self.backend.extend(&self.name, &self.holder, self.lease).await
    }

    /// 释放锁，返回锁记录是否被本次调用删除
    pub async fn release(&mut self) -> bool {
        if !self.held {
            return false;
        }
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        self.held = false;
        self.registry.deregister(&self.holder);

        let retries = self.config.unlock_retries.max(1);
        let delay = Duration::from_millis(self.config.unlock_retry_delay_ms);
        let mut last_error = None;
        for attempt in 0..retries {
            match self.backend.unlock(&self.name, &self.holder).await {
                Ok(true) => {
                    debug!(lock = %self.name, "锁已释放");
                    return true;
                }
                Ok(false) => {
                    warn!(lock = %self.name, "释放时锁已过期或被其他节点持有");
                    return false;
                }
                Err(e) => last_error = Some(e),
            }
            if attempt + 1 < retries {
                sleep(delay).await;
            }
        }

        let error = last_error
            .unwrap_or_else(|| SyncError::lock(format!("释放锁失败: {}", self.name)));
        StructuredLogger::log_system_error("coordination", "unlock", &error);
        false
    }
}

impl std::fmt::Debug for LeasedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedLock")
            .field("name", &self.name)
            .field("holder", &self.holder)
            .field("lease", &self.lease)
            .field("held", &self.held)
            .finish()
    }
}

impl Drop for LeasedLock {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        if !self.held {
            return;
        }
        self.registry.deregister(&self.holder);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let backend = self.backend.clone();
            let name = std::mem::take(&mut self.name);
            let holder = std::mem::take(&mut self.holder);
            handle.spawn(async move {
                if let Err(e) = backend.unlock(&name, &holder).await {
                    warn!(lock = %name, "丢弃时释放锁失败: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CoordinationService, InMemoryLockBackend};

    fn coordination() -> (Arc<dyn LockBackend>, CoordinationService) {
        let backend: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::new());
        let service = CoordinationService::new(backend.clone(), CoordinationConfig::default());
        (backend, service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_lock_past_lease() {
        let (backend, service) = coordination();
        let mut lock = service.create_lock_with_lease("L", Duration::from_secs(1));
        assert!(lock.try_acquire(Duration::ZERO).await.unwrap());

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(backend.is_locked("L").await.unwrap());
        assert!(!backend
            .try_lock("L", "other", Duration::from_secs(1))
            .await
            .unwrap());
        assert!(lock.release().await);
        assert!(!backend.is_locked("L").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_acquire_waits_for_expiry() {
        let (backend, service) = coordination();
        assert!(backend
            .try_lock("L", "crashed-node", Duration::from_secs(1))
            .await
            .unwrap());

        let mut lock = service.create_lock("L");
        assert!(!lock.try_acquire(Duration::ZERO).await.unwrap());
        assert!(lock.try_acquire(Duration::from_secs(3)).await.unwrap());
        assert!(lock.is_held());
        lock.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let (backend, service) = coordination();
        assert!(backend
            .try_lock("L", "other", Duration::from_secs(60))
            .await
            .unwrap());

        let mut lock = service.create_lock("L");
        assert!(!lock.try_acquire(Duration::from_secs(2)).await.unwrap());
        assert!(!lock.is_held());
        assert!(service.held_locks().is_empty());
    }

    #[tokio::test]
    async fn test_drop_releases_held_lock() {
        let (backend, service) = coordination();
        {
            let mut lock = service.create_lock("L");
            assert!(lock.try_acquire(Duration::ZERO).await.unwrap());
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!backend.is_locked("L").await.unwrap());
    }

    /// 获取总是成功、续约总是发现锁已易主的后端
    struct TakenOverBackend;

    #[async_trait::async_trait]
    impl LockBackend for TakenOverBackend {
        async fn try_lock(&self, _name: &str, _holder: &str, _lease: Duration) -> SyncResult<bool> {
            Ok(true)
        }

        async fn extend(&self, _name: &str, _holder: &str, _lease: Duration) -> SyncResult<bool> {
            Ok(false)
        }

        async fn unlock(&self, _name: &str, _holder: &str) -> SyncResult<bool> {
            Ok(false)
        }

        async fn is_locked(&self, _name: &str) -> SyncResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_is_signalled() {
        let service = CoordinationService::new(
            Arc::new(TakenOverBackend),
            CoordinationConfig::default(),
        );
        let run = CancellationToken::new();
        let mut lock = service
            .create_lock_with_lease("L", Duration::from_secs(2))
            .cancel_on_loss(run.clone());
        assert!(lock.try_acquire(Duration::ZERO).await.unwrap());
        assert!(lock.is_held());
        assert_eq!(service.held_locks(), vec!["L".to_string()]);

        tokio::time::timeout(Duration::from_secs(5), run.cancelled())
            .await
            .expect("loss cancels the registered token");

        assert!(lock.is_lost());
        assert!(!lock.is_held());
        assert!(service.held_locks().is_empty());
        assert!(!lock.release().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewed_lock_is_not_lost() {
        let (_, service) = coordination();
        let run = CancellationToken::new();
        let mut lock = service
            .create_lock_with_lease("L", Duration::from_secs(1))
            .cancel_on_loss(run.clone());
        assert!(lock.try_acquire(Duration::ZERO).await.unwrap());

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!lock.is_lost());
        assert!(!run.is_cancelled());
        lock.release().await;
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_noop() {
        let (_, service) = coordination();
        let mut lock = service.create_lock("L");
        assert!(!lock.release().await);
    }
}

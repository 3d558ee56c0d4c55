use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use syncer_core::config::CoordinationConfig;
use syncer_core::{LockBackend, SyncResult};
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::lock::LeasedLock;

/// 进程内持有中的锁登记表
///
/// 以持有者标识为键，记录锁名和续约任务句柄，关闭时据此强制释放。
#[derive(Debug, Default)]
pub struct HeldLocks {
    entries: Mutex<HashMap<String, HeldLock>>,
}

#[derive(Debug)]
struct HeldLock {
    name: String,
    renewal: Option<AbortHandle>,
}

impl HeldLocks {
    pub(crate) fn register(&self, holder: &str, name: &str, renewal: Option<AbortHandle>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                holder.to_string(),
                HeldLock {
                    name: name.to_string(),
                    renewal,
                },
            );
        }
    }

    pub(crate) fn deregister(&self, holder: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(holder);
        }
    }

    /// 当前持有的锁名
    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.values().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }

    fn drain(&self) -> Vec<(String, HeldLock)> {
        self.entries
            .lock()
            .map(|mut entries| entries.drain().collect())
            .unwrap_or_default()
    }
}

/// 协调服务
///
/// 创建租约锁并维护本进程的持有登记。同一个服务实例在进程内共享。
#[derive(Clone)]
pub struct CoordinationService {
    backend: Arc<dyn LockBackend>,
    config: CoordinationConfig,
    node_id: String,
    held: Arc<HeldLocks>,
}

impl CoordinationService {
    pub fn new(backend: Arc<dyn LockBackend>, config: CoordinationConfig) -> Self {
        let node_id = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self {
            backend,
            config,
            node_id,
            held: Arc::new(HeldLocks::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// 使用默认租约创建锁
    pub fn create_lock(&self, name: &str) -> LeasedLock {
        self.create_lock_with_lease(name, self.config.lease())
    }

    pub fn create_lock_with_lease(&self, name: &str, lease: Duration) -> LeasedLock {
        let holder = format!("{}-{}", self.node_id, Uuid::new_v4().simple());
        LeasedLock::new(
            name,
            holder,
            lease,
            self.backend.clone(),
            self.config.clone(),
            self.held.clone(),
        )
    }

    /// 集群内是否有人持有该锁
    pub async fn is_locked(&self, name: &str) -> SyncResult<bool> {
        self.backend.is_locked(name).await
    }

    pub fn held_locks(&self) -> Vec<String> {
        self.held.names()
    }

    /// 停止所有续约并释放本进程持有的锁
    pub async fn close(&self) {
        let entries = self.held.drain();
        if entries.is_empty() {
            return;
        }
        info!("释放本进程持有的 {} 个锁", entries.len());
        for (holder, entry) in entries {
            if let Some(renewal) = entry.renewal {
                renewal.abort();
            }
            match self.backend.unlock(&entry.name, &holder).await {
                Ok(true) => {}
                Ok(false) => warn!("锁已过期或被其他节点持有: {}", entry.name),
                Err(e) => warn!("关闭时释放锁 {} 失败: {}", entry.name, e),
            }
        }
    }
}

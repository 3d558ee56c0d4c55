use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use syncer_core::{LockBackend, SyncError, SyncResult};
use tokio::time::Instant;

/// 单进程锁后端，供测试和单节点部署使用
#[derive(Debug, Default)]
pub struct InMemoryLockBackend {
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> SyncResult<MutexGuard<'_, HashMap<String, (String, Instant)>>> {
        self.locks
            .lock()
            .map_err(|e| SyncError::lock(format!("锁表已损坏: {e}")))
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_lock(&self, name: &str, holder: &str, lease: Duration) -> SyncResult<bool> {
        let now = Instant::now();
        let mut locks = self.locks()?;
        match locks.get(name) {
            Some((_, expires_at)) if *expires_at > now => Ok(false),
            _ => {
                locks.insert(name.to_string(), (holder.to_string(), now + lease));
                Ok(true)
            }
        }
    }

    async fn extend(&self, name: &str, holder: &str, lease: Duration) -> SyncResult<bool> {
        let now = Instant::now();
        let mut locks = self.locks()?;
        match locks.get_mut(name) {
            Some((current, expires_at)) if current == holder && *expires_at > now => {
                *expires_at = now + lease;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, name: &str, holder: &str) -> SyncResult<bool> {
        let mut locks = self.locks()?;
        match locks.get(name) {
            Some((current, _)) if current == holder => {
                locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, name: &str) -> SyncResult<bool> {
        let now = Instant::now();
        Ok(self
            .locks()?
            .get(name)
            .is_some_and(|(_, expires_at)| *expires_at > now))
    }
}

use std::time::Duration;

use async_trait::async_trait;

use crate::SyncResult;

/// 租约锁的存储后端
///
/// 只负责单次原子操作，重试、续约和已持有锁的登记由上层的租约锁完成。
/// `holder` 是本进程生成的唯一标识，只有持有者才能续约或释放。
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// 锁不存在或已过期时写入并返回 true
    async fn try_lock(&self, name: &str, holder: &str, lease: Duration) -> SyncResult<bool>;

    /// 持有者仍是 `holder` 时把租约推后，否则返回 false
    async fn extend(&self, name: &str, holder: &str, lease: Duration) -> SyncResult<bool>;

    /// 持有者仍是 `holder` 时删除，否则返回 false
    async fn unlock(&self, name: &str, holder: &str) -> SyncResult<bool>;

    /// 当前是否有人持有（未过期）该锁
    async fn is_locked(&self, name: &str) -> SyncResult<bool>;
}

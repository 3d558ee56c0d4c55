use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use syncer_core::{LockBackend, SyncResult};

use crate::redis_connection::RedisConnectionManager;
use crate::store::keys::mutex_key;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis 锁后端
///
/// 锁记录保存在 `coordination:mutex#<name>`，值为持有者标识。
/// 获取使用 `SET NX PX`，续约和释放通过脚本比较持有者后原子执行。
#[derive(Clone)]
pub struct RedisLockBackend {
    connection: RedisConnectionManager,
    extend_script: Script,
    unlock_script: Script,
}

impl RedisLockBackend {
    pub fn new(connection: RedisConnectionManager) -> Self {
        Self {
            connection,
            extend_script: Script::new(EXTEND_SCRIPT),
            unlock_script: Script::new(UNLOCK_SCRIPT),
        }
    }
}

fn lease_millis(lease: Duration) -> u64 {
    (lease.as_millis() as u64).max(1)
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_lock(&self, name: &str, holder: &str, lease: Duration) -> SyncResult<bool> {
        let mut conn = self.connection.connection();
        let result: Option<String> = redis::cmd("SET")
            .arg(mutex_key(name))
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(lease_millis(lease))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn extend(&self, name: &str, holder: &str, lease: Duration) -> SyncResult<bool> {
        let mut conn = self.connection.connection();
        let result: i32 = self
            .extend_script
            .key(mutex_key(name))
            .arg(holder)
            .arg(lease_millis(lease))
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn unlock(&self, name: &str, holder: &str) -> SyncResult<bool> {
        let mut conn = self.connection.connection();
        let result: i32 = self
            .unlock_script
            .key(mutex_key(name))
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn is_locked(&self, name: &str) -> SyncResult<bool> {
        let mut conn = self.connection.connection();
        let exists: bool = redis::cmd("EXISTS")
            .arg(mutex_key(name))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }
}

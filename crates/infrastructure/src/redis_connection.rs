use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Client;
use syncer_core::{config::RedisConfig, SyncError, SyncResult};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// 共享存储的Redis连接
///
/// 内部的 `ConnectionManager` 可以廉价克隆，断线后自动重连。
#[derive(Clone)]
pub struct RedisConnectionManager {
    manager: ConnectionManager,
}

impl RedisConnectionManager {
    pub async fn new(config: &RedisConfig) -> SyncResult<Self> {
        let redis_url = config.build_connection_url();
        let client = Client::open(redis_url)
            .map_err(|e| SyncError::store(format!("Failed to create Redis client: {e}")))?;

        let manager = Self::connect_with_retry(client, config).await?;
        let connection = Self { manager };
        connection.ping().await?;
        debug!(
            "Successfully connected to Redis at {}:{}",
            config.host, config.port
        );
        Ok(connection)
    }

    async fn connect_with_retry(
        client: Client,
        config: &RedisConfig,
    ) -> SyncResult<ConnectionManager> {
        let mut last_error = None;
        let timeout = Duration::from_secs(config.connection_timeout_seconds);

        for attempt in 0..config.max_retry_attempts {
            match tokio::time::timeout(timeout, ConnectionManager::new(client.clone())).await {
                Ok(Ok(manager)) => {
                    if attempt > 0 {
                        debug!(
                            "Successfully reconnected to Redis after {} attempts",
                            attempt + 1
                        );
                    }
                    return Ok(manager);
                }
                Ok(Err(e)) => last_error = Some(e.to_string()),
                Err(_) => last_error = Some(format!("timed out after {}s", timeout.as_secs())),
            }

            if attempt < config.max_retry_attempts - 1 {
                warn!(
                    "Failed to connect to Redis (attempt {}/{}): {}. Retrying in {}s...",
                    attempt + 1,
                    config.max_retry_attempts,
                    last_error.as_deref().unwrap_or("unknown"),
                    config.retry_delay_seconds
                );
                sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }

        let error_msg = format!(
            "Failed to connect to Redis after {} attempts. Last error: {}",
            config.max_retry_attempts,
            last_error.unwrap_or_else(|| "Unknown".to_string())
        );
        error!("{}", error_msg);
        Err(SyncError::store(error_msg))
    }

    /// 获取一个连接句柄
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> SyncResult<()> {
        let mut conn = self.connection();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            Err(SyncError::store(error_msg))
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}

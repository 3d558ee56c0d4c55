use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 租约锁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// 默认租约时长（毫秒）
    pub lease_ms: u64,
    /// 阻塞获取时在超时内平均分布的尝试次数
    pub acquire_retries: u32,
    /// 释放锁时的最大尝试次数
    pub unlock_retries: u32,
    pub unlock_retry_delay_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lease_ms: 8_000,
            acquire_retries: 100,
            unlock_retries: 5,
            unlock_retry_delay_ms: 200,
        }
    }
}

impl CoordinationConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lease_ms < 2 {
            return Err(anyhow::anyhow!("锁租约时长过短: {}ms", self.lease_ms));
        }
        if self.acquire_retries == 0 {
            return Err(anyhow::anyhow!("获取锁的重试次数必须大于0"));
        }
        if self.unlock_retries == 0 {
            return Err(anyhow::anyhow!("释放锁的重试次数必须大于0"));
        }
        Ok(())
    }
}

/// 任务执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub enabled: bool,
    pub pool_size: usize,
    pub poll_interval_ms: u64,
    pub monitor_interval_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    /// 获取执行锁的超时时间（秒）
    pub lock_timeout_seconds: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_size: 16,
            poll_interval_ms: 1_000,
            monitor_interval_seconds: 20,
            heartbeat_interval_seconds: 10,
            lock_timeout_seconds: 10,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_size == 0 {
            return Err(anyhow::anyhow!("执行池大小必须大于0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }
        if self.monitor_interval_seconds == 0 {
            return Err(anyhow::anyhow!("监控间隔必须大于0"));
        }
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }
        Ok(())
    }
}

/// 定时触发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 触发失败后额外重试的次数
    pub max_retries: u32,
    /// 第 n 次重试的延迟为 n * retry_delay_seconds
    pub retry_delay_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            retry_delay_seconds: 60,
        }
    }
}

/// 停滞任务检测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StallConfig {
    pub enabled: bool,
    pub threshold_seconds: u64,
    pub scan_interval_seconds: u64,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_seconds: 600,
            scan_interval_seconds: 60,
        }
    }
}

impl StallConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.threshold_seconds == 0 {
            return Err(anyhow::anyhow!("停滞阈值必须大于0"));
        }
        if self.scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("停滞扫描间隔必须大于0"));
        }
        Ok(())
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// 同步引擎自身写入的日志
pub const SYSTEM_SYNC: &str = "[SYNC]";
/// 连接器输出转写的日志
pub const SYSTEM_CONNECTOR: &str = "[CONNECTOR]";

/// 任务日志记录，按时间追加，不会修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogRecord {
    pub time: DateTime<Utc>,
    pub system: String,
    pub message: String,
    pub level: LogLevel,
}

impl TaskLogRecord {
    pub fn new(system: &str, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            system: system.to_string(),
            message: message.into(),
            level,
        }
    }
}

/// 任务日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = SyncError;

    fn from_str(level: &str) -> Result<Self, Self::Err> {
        match level.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(SyncError::Configuration(format!(
                "Invalid log level: {level}"
            ))),
        }
    }
}

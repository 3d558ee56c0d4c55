//! 优先级模型
//!
//! 把 (优先级档位, 创建时间) 映射成一个全序分数：
//! `score = tier * K - created_at_unix_seconds`。
//! 档位之间永不重叠，同一档位内创建越早分数越大，队列取最大分数即可得到
//! "最高档位、最早创建" 的任务。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// 档位间隔，远大于任何现实中的 Unix 秒数
pub const TIER_MULTIPLIER: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "NOW")]
    Now,
}

impl Priority {
    pub fn tier(&self) -> i64 {
        match self {
            Priority::Low => 1,
            Priority::High => 2,
            Priority::Now => 3,
        }
    }

    pub fn score(&self, created_at: DateTime<Utc>) -> i64 {
        self.tier() * TIER_MULTIPLIER - created_at.timestamp()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::High => "HIGH",
            Priority::Now => "NOW",
        }
    }
}

/// 队列内部使用的毫秒级分数
///
/// 在任务分数后追加创建时间的毫秒部分，同一档位、同一秒内创建的任务
/// 在内存和 Redis 两种队列上都按创建先后出队。结果小于 2^53，
/// 存为 Redis 的浮点分数不会丢失精度。
pub fn queue_score(score: i64, created_at: DateTime<Utc>) -> i64 {
    score * 1_000 - i64::from(created_at.timestamp_subsec_millis())
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "HIGH" => Ok(Priority::High),
            "NOW" => Ok(Priority::Now),
            _ => Err(SyncError::Configuration(format!("Invalid priority: {s}"))),
        }
    }
}

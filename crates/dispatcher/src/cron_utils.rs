use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use syncer_core::{SyncError, SyncResult};

/// CRON表达式解析和调度工具
///
/// 接受标准的五段式表达式（分 时 日 月 周）、带秒的六/七段式表达式，
/// 以及 `@hourly`、`@daily` 等预设。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expr: String,
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> SyncResult<Self> {
        let normalized = Self::normalize(cron_expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| SyncError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expr: cron_expr.to_string(),
            schedule,
        })
    }

    /// 五段式表达式补齐秒字段
    pub fn normalize(cron_expr: &str) -> String {
        let trimmed = cron_expr.trim();
        if trimmed.starts_with('@') {
            return trimmed.to_string();
        }
        if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        }
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取上一次（不晚于 `from`）的执行时间
    pub fn previous_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next_back()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SyncResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}

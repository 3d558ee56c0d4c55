//! 同步调度的分发端
//!
//! 定时触发、任务创建与去重、停滞任务检测。

pub mod cron_trigger;
pub mod cron_utils;
pub mod stall_detector;
pub mod sync_scheduler;
pub mod task_service;

pub use cron_trigger::{CronTrigger, FireCallback};
pub use cron_utils::CronScheduler;
pub use stall_detector::StallDetector;
pub use sync_scheduler::SyncScheduler;
pub use task_service::TaskService;

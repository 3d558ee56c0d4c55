//! # 数据模型
//!
//! 同步调度器的核心数据结构：同步任务、任务日志、时间区间以及连接器产出的记录。
//!
//! 所有时间字段使用 `DateTime<Utc>`，状态字段使用枚举类型，
//! 并实现 `serde` 序列化以便写入共享存储。

pub mod interval;
pub mod record;
pub mod task;
pub mod task_log;

pub use interval::{Granularity, TimeInterval};
pub use record::{BatchHeader, ExternalOutput, Record, StreamBatch};
pub use task::{creation_lock_name, execution_lock_name, Task, TaskFilter, TaskStatus};
pub use task_log::{LogLevel, TaskLogRecord, SYSTEM_CONNECTOR, SYSTEM_SYNC};

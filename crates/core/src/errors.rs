use thiserror::Error;

use crate::models::TaskStatus;

/// 同步调度器错误类型定义
///
/// 变体按照处理方式分为四类：冲突（调用方预期内的结果，不按错误记录）、
/// 校验（配置或参数问题，不会创建任务）、系统（共享存储或锁后端故障）、
/// 执行（连接器或目标存储失败，任务以 FAILED 结束）。
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("同步任务正在创建中: {source_id}.{collection}")]
    AlreadyStarting {
        source_id: String,
        collection: String,
    },

    #[error("同步任务已在执行或排队中: {task_id}")]
    AlreadySyncing { task_id: String },

    #[error("数据源未找到: {id}")]
    SourceNotFound { id: String },

    #[error("数据源 {source_id} 中未找到集合: {collection}")]
    CollectionNotFound {
        source_id: String,
        collection: String,
    },

    #[error("目标存储未注册或未初始化: {id}")]
    DestinationNotReady { id: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("{source_id}.{collection} 已存在调度 (下次执行: {next}, 上次执行: {prev})")]
    ScheduleExists {
        source_id: String,
        collection: String,
        next: String,
        prev: String,
    },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("无效的任务状态转换: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Redis错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("存储错误: {0}")]
    Store(String),

    #[error("分布式锁错误: {0}")]
    Lock(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("任务执行错误: {0}")]
    Execution(String),

    #[error("写入目标存储 {id} 失败: {message}")]
    Destination { id: String, message: String },

    #[error("任务已取消: {task_id}")]
    Canceled { task_id: String },
}

/// 统一的Result类型
pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }
    pub fn lock<S: Into<String>>(msg: S) -> Self {
        Self::Lock(msg.into())
    }
    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Self::Execution(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    /// 另一条触发路径已经在处理同一个 (source, collection)
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyStarting { .. } | SyncError::AlreadySyncing { .. }
        )
    }

    /// 需要以系统级别记录的错误
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            SyncError::Redis(_)
                | SyncError::Store(_)
                | SyncError::Lock(_)
                | SyncError::Serialization(_)
                | SyncError::Internal(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::SourceNotFound { .. }
                | SyncError::CollectionNotFound { .. }
                | SyncError::DestinationNotReady { .. }
                | SyncError::InvalidCron { .. }
                | SyncError::ScheduleExists { .. }
                | SyncError::TaskNotFound { .. }
                | SyncError::InvalidTransition { .. }
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Internal(err.to_string())
    }
}

impl From<chrono::ParseError> for SyncError {
    fn from(err: chrono::ParseError) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

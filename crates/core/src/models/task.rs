use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SyncError;
use crate::priority::Priority;

/// 同步任务
///
/// 表示一次对 (source, collection) 的拉取。由任务服务创建，
/// 只由执行器和任务关闭器修改，核心流程从不删除。
///
/// # 字段说明
///
/// - `id`: `<source>_<collection>_<随机串>`，创建后不可变
/// - `priority`: 创建时计算的全序分数，见 [`Priority::score`]
/// - `started_at` / `finished_at`: 到达对应阶段之前为空
/// - `status`: 只能单向前进，设置 `finished_at` 之后即为终态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub source: String,
    pub collection: String,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

/// 任务状态
///
/// `SCHEDULED → RUNNING → {SUCCESS, FAILED, CANCELED}`。
/// CANCELED 只能由外部取消请求触发；SCHEDULED 也可以直接被取消或判定失败。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELED")]
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Scheduled,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// 状态只能前进，不允许重新进入
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Scheduled, TaskStatus::Running) => true,
            (TaskStatus::Scheduled, TaskStatus::Failed) => true,
            (TaskStatus::Scheduled, TaskStatus::Canceled) => true,
            (TaskStatus::Running, TaskStatus::Success) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Ok(TaskStatus::Scheduled),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELED" => Ok(TaskStatus::Canceled),
            _ => Err(SyncError::Serialization(format!("Invalid task status: {s}"))),
        }
    }
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub source: Option<String>,
    pub collection: Option<String>,
    pub status: Option<TaskStatus>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn for_collection(source: &str, collection: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            collection: Some(collection.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(source) = &self.source {
            if &task.source != source {
                return false;
            }
        }
        if let Some(collection) = &self.collection {
            if &task.collection != collection {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(start) = self.start {
            if task.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if task.created_at > end {
                return false;
            }
        }
        true
    }
}

impl Task {
    /// 创建新的待调度任务
    pub fn new(source: &str, collection: &str, priority: Priority, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::generate_id(source, collection),
            source: source.to_string(),
            collection: collection.to_string(),
            priority: priority.score(now),
            created_at: now,
            started_at: None,
            finished_at: None,
            status: TaskStatus::Scheduled,
        }
    }

    pub fn generate_id(source: &str, collection: &str) -> String {
        format!("{source}_{collection}_{}", Uuid::new_v4().simple())
    }

    /// 执行锁名称，同一个 (source, collection) 在集群内只允许一个执行器持有
    pub fn lock_name(&self) -> String {
        execution_lock_name(&self.source, &self.collection)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some() || self.status.is_terminal()
    }

    /// 推进任务状态，终态会同时写入 `finished_at`
    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> Result<(), SyncError> {
        if !self.status.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            TaskStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}

pub fn execution_lock_name(source: &str, collection: &str) -> String {
    format!("{source}_{collection}")
}

pub fn creation_lock_name(source: &str, collection: &str) -> String {
    format!("{source}_{collection}#create")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_scheduled() {
        let now = Utc::now();
        let task = Task::new("acme", "users", Priority::High, now);
        assert!(task.id.starts_with("acme_users_"));
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.priority, Priority::High.score(now));
        assert!(task.started_at.is_none());
        assert!(task.finished_at.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Task::generate_id("s1", "c1");
        let b = Task::generate_id("s1", "c1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_transitions_are_forward_only() {
        let now = Utc::now();
        let mut task = Task::new("s1", "c1", Priority::Low, now);

        task.transition(TaskStatus::Running, now).unwrap();
        assert_eq!(task.started_at, Some(now));

        assert!(task.transition(TaskStatus::Scheduled, now).is_err());
        assert!(task.transition(TaskStatus::Running, now).is_err());

        task.transition(TaskStatus::Success, now).unwrap();
        assert!(task.finished_at.is_some());
        assert!(task.is_finished());

        let err = task.transition(TaskStatus::Failed, now).unwrap_err();
        assert!(matches!(err, SyncError::InvalidTransition { .. }));
    }

    #[test]
    fn test_status_round_trip_from_str() {
        for status in [
            TaskStatus::Scheduled,
            TaskStatus::Running,
            TaskStatus::Success,
            TaskStatus::Failed,
            TaskStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("PAUSED".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let now = Utc::now();
        let task = Task::new("s1", "c1", Priority::Low, now);

        assert!(TaskFilter::for_collection("s1", "c1").matches(&task));
        assert!(!TaskFilter::for_collection("s1", "c2").matches(&task));

        let filter = TaskFilter {
            status: Some(TaskStatus::Running),
            ..TaskFilter::default()
        };
        assert!(!filter.matches(&task));

        let filter = TaskFilter {
            start: Some(now + chrono::Duration::seconds(1)),
            ..TaskFilter::default()
        };
        assert!(!filter.matches(&task));
    }

    #[test]
    fn test_lock_names() {
        assert_eq!(execution_lock_name("s1", "c1"), "s1_c1");
        assert_eq!(creation_lock_name("s1", "c1"), "s1_c1#create");
    }
}

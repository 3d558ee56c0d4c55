//! 共享存储的键布局

pub const PRIORITY_QUEUE_KEY: &str = "sync_tasks_priority_queue";
pub const HEARTBEAT_KEY: &str = "sync_tasks_heartbeat";
pub const TASK_KEY_PATTERN: &str = "sync_tasks#*";

pub fn task_key(task_id: &str) -> String {
    format!("sync_tasks#{task_id}")
}

pub fn task_logs_key(task_id: &str) -> String {
    format!("sync_tasks#{task_id}:logs")
}

pub fn task_index_key(source: &str, collection: &str) -> String {
    format!("sync_tasks_index:source#{source}:collection#{collection}")
}

/// 排队中任务按 (source, collection) 的二级索引
pub fn queued_tasks_key(source: &str, collection: &str) -> String {
    format!("sync_tasks_queued:source#{source}:collection#{collection}")
}

pub fn mutex_key(name: &str) -> String {
    format!("coordination:mutex#{name}")
}

pub fn chunks_key(source: &str, collection: &str) -> String {
    format!("source#{source}:collection#{collection}:chunks")
}

pub fn config_snapshot_key(source: &str) -> String {
    format!("source#{source}:config")
}

/// 从任务键中解析任务ID，日志键返回 None
pub fn task_id_from_key(key: &str) -> Option<&str> {
    let id = key.strip_prefix("sync_tasks#")?;
    if id.ends_with(":logs") {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(task_key("t1"), "sync_tasks#t1");
        assert_eq!(task_logs_key("t1"), "sync_tasks#t1:logs");
        assert_eq!(
            task_index_key("s1", "c1"),
            "sync_tasks_index:source#s1:collection#c1"
        );
        assert_eq!(
            queued_tasks_key("s1", "c1"),
            "sync_tasks_queued:source#s1:collection#c1"
        );
        assert_eq!(mutex_key("s1_c1"), "coordination:mutex#s1_c1");
        assert_eq!(chunks_key("s1", "c1"), "source#s1:collection#c1:chunks");
    }

    #[test]
    fn test_task_id_from_key() {
        assert_eq!(task_id_from_key("sync_tasks#s1_c1_x"), Some("s1_c1_x"));
        assert_eq!(task_id_from_key("sync_tasks#s1_c1_x:logs"), None);
        assert_eq!(task_id_from_key("sync_tasks_priority_queue"), None);
    }
}

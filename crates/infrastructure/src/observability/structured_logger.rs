//! Structured logging utilities
//!
//! Event-style log lines for task lifecycle transitions and system errors.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log task creation
    pub fn log_task_created(task_id: &str, source: &str, collection: &str, priority: i64) {
        info!(
            event = "task_created",
            task.id = task_id,
            task.source = source,
            task.collection = collection,
            task.priority = priority,
            "Sync task created and queued"
        );
    }

    /// Log task execution start
    pub fn log_task_started(task_id: &str, source: &str, collection: &str) {
        info!(
            event = "task_started",
            task.id = task_id,
            task.source = source,
            task.collection = collection,
            "Sync task execution started"
        );
    }

    /// Log task completion
    pub fn log_task_finished(
        task_id: &str,
        status: &str,
        started_at: Option<DateTime<Utc>>,
        error_message: Option<&str>,
    ) {
        let duration_ms = started_at
            .map(|s| (Utc::now() - s).num_milliseconds())
            .unwrap_or_default();
        match error_message {
            None => info!(
                event = "task_finished",
                task.id = task_id,
                task.status = status,
                task.duration_ms = duration_ms,
                "Sync task finished"
            ),
            Some(message) => warn!(
                event = "task_finished",
                task.id = task_id,
                task.status = status,
                task.duration_ms = duration_ms,
                task.error = message,
                "Sync task finished with error"
            ),
        }
    }

    /// Log system error
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            error.component = component,
            error.operation = operation,
            error.message = %error,
            "System error occurred"
        );
    }
}

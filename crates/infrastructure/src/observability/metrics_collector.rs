//! Metrics for the sync scheduler
//!
//! Counters are labelled per source and destination; pool gauges are
//! reported by the executor's monitoring loop.

use metrics::{counter, gauge, histogram};

/// Metrics collector for sync tasks
#[derive(Debug, Clone, Default)]
pub struct SyncMetrics;

impl SyncMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Records were written to a destination
    pub fn record_success(&self, source: &str, destination: &str, rows: usize) {
        counter!(
            "syncer_sync_success_total",
            "source" => source.to_string(),
            "destination" => destination.to_string()
        )
        .increment(1);
        counter!(
            "syncer_records_written_total",
            "source" => source.to_string(),
            "destination" => destination.to_string()
        )
        .increment(rows as u64);
    }

    /// A write to a destination failed
    pub fn record_error(&self, source: &str, destination: &str) {
        counter!(
            "syncer_sync_errors_total",
            "source" => source.to_string(),
            "destination" => destination.to_string()
        )
        .increment(1);
    }

    /// A destination was skipped because it was missing or not ready
    pub fn record_skip(&self, source: &str, destination: &str) {
        counter!(
            "syncer_sync_skipped_total",
            "source" => source.to_string(),
            "destination" => destination.to_string()
        )
        .increment(1);
    }

    pub fn record_task_finished(&self, source: &str, status: &str, duration_seconds: f64) {
        counter!(
            "syncer_tasks_finished_total",
            "source" => source.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("syncer_task_duration_seconds").record(duration_seconds);
    }

    pub fn update_pool(&self, running: usize, free: usize) {
        gauge!("syncer_pool_running").set(running as f64);
        gauge!("syncer_pool_free").set(free as f64);
    }

    pub fn update_queue_depth(&self, depth: usize) {
        gauge!("syncer_queue_depth").set(depth as f64);
    }
}

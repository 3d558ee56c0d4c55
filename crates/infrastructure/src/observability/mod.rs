//! Observability module
//!
//! Logging initialisation, structured event logging and the metrics
//! recorded by the scheduler and executor.

pub mod logging;
pub mod metrics_collector;
pub mod structured_logger;

pub use logging::{init_logging, install_metrics_exporter};
pub use metrics_collector::SyncMetrics;
pub use structured_logger::StructuredLogger;

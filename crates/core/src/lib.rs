pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod priority;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use logging::TaskLogger;
pub use models::{
    BatchHeader, ExternalOutput, Granularity, LogLevel, Record, StreamBatch, Task, TaskFilter,
    TaskLogRecord, TaskStatus, TimeInterval,
};
pub use priority::Priority;
pub use traits::{
    CollectionDriver, DestinationCatalog, ExternalDriver, LockBackend, NativeDriver, SourceCatalog,
    SourceUnit, Storage, SyncNotifier, SyncStateStore, TaskStore,
};

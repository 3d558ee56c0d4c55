pub mod catalog;
pub mod coordination;
pub mod observability;
pub mod redis_connection;
pub mod storage;
pub mod store;
pub mod supervisor;

pub use catalog::{StaticDestinationCatalog, StaticSourceCatalog};
pub use coordination::{CoordinationService, InMemoryLockBackend, LeasedLock, RedisLockBackend};
pub use observability::{init_logging, install_metrics_exporter, StructuredLogger, SyncMetrics};
pub use redis_connection::RedisConnectionManager;
pub use storage::FileStorage;
pub use store::{InMemoryStore, RedisStore};
pub use supervisor::{supervise, RestartPolicy};

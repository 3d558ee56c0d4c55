pub mod app_config;
pub mod catalog;
pub mod observability;
pub mod scheduling;
pub mod store;

pub use app_config::AppConfig;
pub use catalog::{CollectionConfig, DestinationConfig, DestinationKind, SourceConfig};
pub use observability::ObservabilityConfig;
pub use scheduling::{CoordinationConfig, ExecutorConfig, SchedulerConfig, StallConfig};
pub use store::{RedisConfig, StoreBackend, StoreConfig};

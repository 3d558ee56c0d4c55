pub mod catalog;
pub mod driver;
pub mod lock;
pub mod notify;
pub mod store;

pub use catalog::{DestinationCatalog, SourceCatalog, SourceUnit, Storage};
pub use driver::{CollectionDriver, ExternalDriver, NativeDriver};
pub use lock::LockBackend;
pub use notify::SyncNotifier;
pub use store::{SyncStateStore, TaskStore};

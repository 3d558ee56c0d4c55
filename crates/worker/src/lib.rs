pub mod closer;
pub mod enrichment;
pub mod executor;
pub mod heartbeat;
pub mod notifier;
pub mod singer;

pub use closer::TaskCloser;
pub use executor::TaskExecutor;
pub use heartbeat::TaskHeartbeat;
pub use notifier::LogNotifier;
pub use singer::SingerDriver;

pub mod task_logger;

pub use task_logger::TaskLogger;

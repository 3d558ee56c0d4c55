//! 目标存储实现

pub mod file;

pub use file::FileStorage;

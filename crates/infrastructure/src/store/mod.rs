//! 共享存储实现
//!
//! Redis 实现用于集群部署；内存实现满足同样的原子性约束，用于单进程和测试。

pub mod keys;
pub mod memory;
pub mod redis;

pub use memory::InMemoryStore;
pub use self::redis::RedisStore;

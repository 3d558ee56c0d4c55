//! 集群级互斥
//!
//! 基于租约的命名锁：获取成功后后台按半个租约周期续约，
//! 进程内登记所有持有中的锁，关闭时统一释放。

pub mod lock;
pub mod memory_backend;
pub mod redis_backend;
pub mod service;

pub use lock::LeasedLock;
pub use memory_backend::InMemoryLockBackend;
pub use redis_backend::RedisLockBackend;
pub use service::{CoordinationService, HeldLocks};

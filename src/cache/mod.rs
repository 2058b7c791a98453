// 缓存模块
// 键值存储客户端、后端实现和缓存键

pub mod client;
pub mod keys;
pub mod memory_store;
pub mod redis_store;
pub mod store;

// 重新导出常用类型，方便其他模块使用
pub use client::CacheClient;
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{KeyValueStore, MessageStream, StoreError, StoreResult};

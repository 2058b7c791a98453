use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 订阅频道得到的消息流
pub type MessageStream = BoxStream<'static, String>;

/// 键值存储后端
///
/// `ttl` 沿用 Redis 的约定：键不存在返回 -2，键没有过期时间返回 -1。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 写入值，`ttl_secs` 为 `None` 时不设置过期时间
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()>;

    /// 删除键，返回删除的数量
    async fn del(&self, key: &str) -> StoreResult<u64>;

    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// 设置过期时间，键不存在时返回 false
    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// 自增计数，仅在计数变为 1 时设置窗口过期时间
    ///
    /// 默认实现是两次往返，进程在两次调用之间崩溃会留下没有过期时间的键。
    /// 支持脚本的后端应覆盖为原子操作。
    async fn incr_with_window(&self, key: &str, window_secs: u64) -> StoreResult<i64> {
        let count = self.incr(key).await?;
        if count == 1 {
            self.expire(key, window_secs).await?;
        }
        Ok(count)
    }

    /// 发布消息，返回收到消息的订阅者数量
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<u64>;

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream>;

    async fn ping(&self) -> StoreResult<()>;
}

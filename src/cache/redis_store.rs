use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client as RedisClient, Script};

use super::store::{KeyValueStore, MessageStream, StoreResult};

/// 原子地自增并在首次创建时设置过期时间
const INCR_WITH_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// 基于 Redis 的存储后端
#[derive(Clone)]
pub struct RedisStore {
    redis: Arc<RedisClient>,
    incr_script: Arc<Script>,
}

impl RedisStore {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis: Arc::new(redis),
            incr_script: Arc::new(Script::new(INCR_WITH_WINDOW_SCRIPT)),
        }
    }

    pub fn open(url: &str) -> StoreResult<Self> {
        Ok(Self::new(RedisClient::open(url)?))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let applied: bool = conn.expire(key, seconds as i64).await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let remaining: i64 = conn.ttl(key).await?;
        Ok(remaining)
    }

    async fn incr_with_window(&self, key: &str, window_secs: u64) -> StoreResult<i64> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let count: i64 = self
            .incr_script
            .key(key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<u64> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let receivers: u64 = conn.publish(channel, message).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        let mut pubsub = self.redis.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(
                            channel = msg.get_channel_name(),
                            "Dropping undecodable message: {}",
                            e
                        );
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

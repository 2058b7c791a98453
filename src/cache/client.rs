use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use super::memory_store::MemoryStore;
use super::redis_store::RedisStore;
use super::store::{KeyValueStore, MessageStream, StoreResult};
use crate::clock::Clock;
use crate::config::{Config, StoreBackend};

/// 控制面使用的键值存储客户端
///
/// 禁用时所有读操作返回空或零，写操作直接成功，不访问任何后端，
/// 调用方无需区分这两种模式。
#[derive(Clone)]
pub struct CacheClient {
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    /// 按配置选择后端
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        match config.store_backend {
            StoreBackend::Disabled => {
                tracing::warn!("Key-value store disabled, control plane runs in pass-through mode");
                Ok(Self::disabled())
            }
            StoreBackend::Memory => {
                tracing::info!("Using in-process key-value store");
                Ok(Self::new(Arc::new(MemoryStore::new(clock))))
            }
            StoreBackend::Redis => {
                tracing::info!(
                    "Using redis key-value store at {}:{}",
                    config.redis_host,
                    config.redis_port
                );
                Ok(Self::new(Arc::new(RedisStore::open(&config.redis_url())?)))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match &self.backend {
            Some(store) => store.get(key).await,
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        match &self.backend {
            Some(store) => store.set(key, value, ttl_secs).await,
            None => Ok(()),
        }
    }

    pub async fn del(&self, key: &str) -> StoreResult<u64> {
        match &self.backend {
            Some(store) => store.del(key).await,
            None => Ok(0),
        }
    }

    pub async fn incr(&self, key: &str) -> StoreResult<i64> {
        match &self.backend {
            Some(store) => store.incr(key).await,
            None => Ok(0),
        }
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        match &self.backend {
            Some(store) => store.expire(key, seconds).await,
            None => Ok(true),
        }
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<i64> {
        match &self.backend {
            Some(store) => store.ttl(key).await,
            None => Ok(0),
        }
    }

    pub async fn incr_with_window(&self, key: &str, window_secs: u64) -> StoreResult<i64> {
        match &self.backend {
            Some(store) => store.incr_with_window(key, window_secs).await,
            None => Ok(0),
        }
    }

    pub async fn publish(&self, channel: &str, message: &str) -> StoreResult<u64> {
        match &self.backend {
            Some(store) => store.publish(channel, message).await,
            None => Ok(0),
        }
    }

    /// 禁用时返回一个立即结束的空流
    pub async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        match &self.backend {
            Some(store) => store.subscribe(channel).await,
            None => Ok(Box::pin(futures_util::stream::empty())),
        }
    }

    pub async fn ping(&self) -> StoreResult<()> {
        match &self.backend {
            Some(store) => store.ping().await,
            None => Ok(()),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        self.set(key, &json, ttl_secs).await
    }
}

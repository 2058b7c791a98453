use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::store::{KeyValueStore, MessageStream, StoreError, StoreResult};
use crate::clock::Clock;

/// 每个频道缓冲的消息数
const CHANNEL_CAPACITY: usize = 64;

/// 每累计多少次写入整体清理一次过期键
const SWEEP_EVERY_WRITES: u64 = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 进程内存储后端
///
/// 单实例部署和测试使用。过期按注入的时钟判断：访问时清理单个键，
/// 另外每 `SWEEP_EVERY_WRITES` 次写入整体清理一次，不再访问的键也会被回收。
/// 发布订阅基于 broadcast 频道。
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    writes: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
            clock,
        }
    }

    /// 当前未过期的键数量
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 立即清理所有过期键，返回清理的数量
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        Self::sweep(&mut self.entries.lock(), now)
    }

    fn sweep(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    fn note_write(&self, entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES == 0 {
            let purged = Self::sweep(entries, now);
            if purged > 0 {
                tracing::debug!(purged, "Purged expired keys");
            }
        }
    }

    /// 取出未过期的条目，顺带清理已过期的
    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Ok(Self::live_entry(&mut entries, key, now).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        let now = self.clock.now();
        let expires_at = ttl_secs.map(|ttl| now + Duration::seconds(ttl as i64));
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.note_write(&mut entries, now);
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let removed = entries.remove(key).is_some_and(|entry| !entry.is_expired(now));
        Ok(u64::from(removed))
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let count = match Self::live_entry(&mut entries, key, now) {
            Some(entry) => {
                let count = entry.value.parse::<i64>().map_err(|_| {
                    StoreError::Unavailable(format!("value at {} is not an integer", key))
                })? + 1;
                entry.value = count.to_string();
                count
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                1
            }
        };
        self.note_write(&mut entries, now);
        Ok(count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match Self::live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + Duration::seconds(seconds as i64));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let remaining = match Self::live_entry(&mut entries, key, now) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                // 不足一秒按一秒计
                let millis = (*at - now).num_milliseconds();
                (millis + 999) / 1000
            }
        };
        Ok(remaining)
    }

    async fn incr_with_window(&self, key: &str, window_secs: u64) -> StoreResult<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let count = match Self::live_entry(&mut entries, key, now) {
            Some(entry) => {
                let count = entry.value.parse::<i64>().map_err(|_| {
                    StoreError::Unavailable(format!("value at {} is not an integer", key))
                })? + 1;
                entry.value = count.to_string();
                count
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: Some(now + Duration::seconds(window_secs as i64)),
                    },
                );
                1
            }
        };
        self.note_write(&mut entries, now);
        Ok(count)
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<u64> {
        let channels = self.channels.lock();
        let receivers = channels
            .get(channel)
            .and_then(|sender| sender.send(message.to_string()).ok())
            .unwrap_or(0);
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        let receiver = self
            .channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagged behind, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use futures_util::StreamExt;

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn values_expire_with_the_clock() {
        let (store, clock) = store();
        store.set("k", "v", Some(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.ttl("k").await.unwrap(), 10);

        clock.advance(Duration::seconds(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn incr_keeps_existing_expiry() {
        let (store, clock) = store();
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.ttl("c").await.unwrap(), -1);
        assert!(store.expire("c", 60).await.unwrap());

        clock.advance(Duration::seconds(20));
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.ttl("c").await.unwrap(), 40);
    }

    #[tokio::test]
    async fn incr_with_window_arms_only_on_creation() {
        let (store, clock) = store();
        assert_eq!(store.incr_with_window("w", 30).await.unwrap(), 1);
        clock.advance(Duration::seconds(10));
        assert_eq!(store.incr_with_window("w", 30).await.unwrap(), 2);
        assert_eq!(store.ttl("w").await.unwrap(), 20);

        clock.advance(Duration::seconds(20));
        assert_eq!(store.incr_with_window("w", 30).await.unwrap(), 1);
        assert_eq!(store.ttl("w").await.unwrap(), 30);
    }

    #[tokio::test]
    async fn expire_on_missing_key_is_false() {
        let (store, _) = store();
        assert!(!store.expire("missing", 5).await.unwrap());
        assert_eq!(store.del("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn incr_rejects_non_integer_values() {
        let (store, _) = store();
        store.set("s", "text", None).await.unwrap();
        assert!(store.incr("s").await.is_err());
    }

    #[tokio::test]
    async fn abandoned_keys_are_swept_by_later_writes() {
        let (store, clock) = store();
        for i in 0..1500 {
            store
                .incr_with_window(&format!("rate_limit:10.0.{}.{}:GET:/", i / 256, i % 256), 60)
                .await
                .unwrap();
        }
        clock.advance(Duration::seconds(61));
        assert_eq!(store.len(), 0);
        assert_eq!(store.entries.lock().len(), 1500);

        for _ in 0..SWEEP_EVERY_WRITES {
            store.incr_with_window("rate_limit:10.1.0.1:GET:/", 60).await.unwrap();
        }
        assert_eq!(store.entries.lock().len(), 1);
    }

    #[tokio::test]
    async fn purge_expired_reports_removed_keys() {
        let (store, clock) = store();
        store.set("curto", "v", Some(5)).await.unwrap();
        store.set("longo", "v", Some(500)).await.unwrap();
        store.set("fixo", "v", None).await.unwrap();

        clock.advance(Duration::seconds(10));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.entries.lock().len(), 2);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let (store, _) = store();
        assert_eq!(store.publish("events", "nobody").await.unwrap(), 0);

        let mut stream = store.subscribe("events").await.unwrap();
        assert_eq!(store.publish("events", "hello").await.unwrap(), 1);
        assert_eq!(stream.next().await.as_deref(), Some("hello"));
    }
}

// In-memory coordination store double for tests.
//
// Implements the same capability surface as the Redis adapter over
// mutex-guarded maps. TTLs are virtualized: every dated entry carries its
// expiry instant and reads drop expired entries lazily. Published pub/sub
// frames are recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;

use super::CoordStore;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, (String, Option<Instant>)>,
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, HashSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    published: Vec<(String, String)>,
}

impl Inner {
    fn purge_expired(&mut self, key: &str) {
        if let Some((_, Some(expiry))) = self.strings.get(key) {
            if Instant::now() >= *expiry {
                self.strings.remove(key);
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryCoordStore {
    inner: Mutex<Inner>,
}

impl MemoryCoordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame published so far, as (channel, payload).
    pub fn published(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Published payloads on one channel, JSON-decoded.
    pub fn published_on(&self, channel: &str) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(c, _)| c == channel)
            .filter_map(|(_, p)| serde_json::from_str(p).ok())
            .collect()
    }

    /// Force-expire a dated key, simulating TTL elapse.
    pub fn force_expire(&self, key: &str) {
        self.inner.lock().unwrap().strings.remove(key);
    }
}

#[async_trait]
impl CoordStore for MemoryCoordStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired(key);
        Ok(inner.strings.get(key).map(|(v, _)| v.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired(key);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), Some(Instant::now() + ttl)));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
        inner.zsets.remove(key);
        inner.sets.remove(key);
        inner.hashes.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired(key);
        Ok(inner.strings.contains_key(key)
            || inner.zsets.contains_key(key)
            || inner.sets.contains_key(key)
            || inner.hashes.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.1 = Some(Instant::now() + ttl);
        }
        // Hash/set/zset TTLs are not tracked by the double.
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(zset) = inner.zsets.get_mut(key) {
            zset.remove(member);
        }
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.zsets.get(key).and_then(|z| z.get(member).copied()))
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>> {
        let sorted = self.zrange_withscores(key).await?;
        Ok(sorted.iter().position(|(m, _)| m == member))
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.zsets.get(key).map(|z| z.len()).unwrap_or(0))
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<(String, f64)> = inner
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(entries)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sets.get(key).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut members: Vec<String> = inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .published
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_semantics() {
        let store = MemoryCoordStore::new();
        assert!(store
            .set_nx_ex("lock:match:a", "w1", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!store
            .set_nx_ex("lock:match:a", "w2", Duration::from_secs(10))
            .await
            .unwrap());
        store.del("lock:match:a").await.unwrap();
        assert!(store
            .set_nx_ex("lock:match:a", "w2", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryCoordStore::new();
        store
            .set_ex("k", "v", Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zset_ordering_and_rank() {
        let store = MemoryCoordStore::new();
        store.zadd("queue:elo", "c", 1600.0).await.unwrap();
        store.zadd("queue:elo", "a", 1400.0).await.unwrap();
        store.zadd("queue:elo", "b", 1500.0).await.unwrap();

        let entries = store.zrange_withscores("queue:elo").await.unwrap();
        let members: Vec<&str> = entries.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["a", "b", "c"]);

        assert_eq!(store.zrank("queue:elo", "b").await.unwrap(), Some(1));
        assert_eq!(store.zrank("queue:elo", "zz").await.unwrap(), None);
        assert_eq!(store.zcard("queue:elo").await.unwrap(), 3);

        // zadd on an existing member updates the score, not the cardinality
        store.zadd("queue:elo", "a", 1700.0).await.unwrap();
        assert_eq!(store.zcard("queue:elo").await.unwrap(), 3);
        assert_eq!(store.zrank("queue:elo", "a").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_sets_and_hashes() {
        let store = MemoryCoordStore::new();
        store.sadd("bots:active", "b1").await.unwrap();
        assert!(store.sismember("bots:active", "b1").await.unwrap());
        store.srem("bots:active", "b1").await.unwrap();
        assert!(!store.sismember("bots:active", "b1").await.unwrap());

        store
            .hset_all(
                "match:m:ratings",
                &[
                    ("player1".into(), "1500".into()),
                    ("problemElo".into(), "1600".into()),
                ],
            )
            .await
            .unwrap();
        let hash = store.hgetall("match:m:ratings").await.unwrap();
        assert_eq!(hash.get("problemElo").map(String::as_str), Some("1600"));
    }

    #[tokio::test]
    async fn test_publish_recorded() {
        let store = MemoryCoordStore::new();
        store
            .publish("events:match", r#"{"type":"match_created"}"#)
            .await
            .unwrap();
        let frames = store.published_on("events:match");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "match_created");
    }
}

//! TTL + LRU response cache, keyed by a stable hash of the request message.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agent_core::{Agent, AgentError, Message, MessageStream, ProtocolError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Custom cache-key generator, given the request message.
pub type KeyGenerator = Arc<dyn Fn(&Message) -> String + Send + Sync>;

#[derive(Clone)]
pub struct CachingConfig {
    pub max_cache_size: usize,
    pub default_ttl: Duration,
    pub key_generator: Option<KeyGenerator>,
}

impl CachingConfig {
    pub fn new(max_cache_size: usize, default_ttl: Duration) -> Result<Self, ProtocolError> {
        if max_cache_size == 0 {
            return Err(ProtocolError::invalid_message("max_cache_size must be >= 1"));
        }
        Ok(Self {
            max_cache_size,
            default_ttl,
            key_generator: None,
        })
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = Some(key_generator);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CachingMetrics {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl CachingMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.misses as f64 / self.total_requests as f64
        }
    }
}

struct CacheEntry {
    response: Message,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Insertion-ordered map with MRU-at-back semantics, implemented with a
/// hashmap for lookup and a deque tracking recency.
struct LruStore {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl LruStore {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn insert(&mut self, key: String, entry: CacheEntry, max_size: usize) -> usize {
        self.entries.insert(key.clone(), entry);
        self.touch(&key);
        let mut evicted = 0;
        while self.entries.len() > max_size {
            if let Some(lru_key) = self.order.pop_front() {
                self.entries.remove(&lru_key);
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }

    fn remove(&mut self, key: &str) -> bool {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key).is_some()
    }

    fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        n
    }

    fn sweep_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

pub struct CachingDecorator {
    inner: Arc<dyn Agent>,
    config: CachingConfig,
    store: Mutex<LruStore>,
    metrics: Mutex<CachingMetrics>,
    request_count: AtomicU64,
}

const CLEANUP_INTERVAL: u64 = 100;

impl CachingDecorator {
    pub fn new(inner: Arc<dyn Agent>, config: CachingConfig) -> Self {
        Self {
            inner,
            config,
            store: Mutex::new(LruStore::new()),
            metrics: Mutex::new(CachingMetrics::default()),
            request_count: AtomicU64::new(0),
        }
    }

    pub async fn metrics(&self) -> CachingMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn get_cache_size(&self) -> usize {
        self.store.lock().await.entries.len()
    }

    pub async fn invalidate(&self, message: Option<&Message>) {
        let mut store = self.store.lock().await;
        let removed = match message {
            Some(msg) => {
                let key = self.cache_key(msg);
                usize::from(store.remove(&key))
            }
            None => store.clear(),
        };
        if removed > 0 {
            self.metrics.lock().await.invalidations += removed as u64;
        }
    }

    fn cache_key(&self, message: &Message) -> String {
        if let Some(generator) = &self.config.key_generator {
            return generator(message);
        }
        let canonical = json_canonical(&serde_json::json!({
            "role": message.role,
            "content": message.content,
            "metadata": message.metadata,
        }));
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn maybe_sweep(&self) {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count % CLEANUP_INTERVAL == 0 {
            let mut store = self.store.lock().await;
            store.sweep_expired(Instant::now());
        }
    }
}

#[async_trait]
impl Agent for CachingDecorator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        self.maybe_sweep().await;
        let key = self.cache_key(&message);
        let now = Instant::now();

        {
            let mut store = self.store.lock().await;
            let mut metrics = self.metrics.lock().await;
            metrics.total_requests += 1;
            if let Some(entry) = store.entries.get(&key) {
                if !entry.is_expired(now) {
                    let response = entry.response.clone();
                    store.touch(&key);
                    metrics.hits += 1;
                    return Ok(response);
                }
                metrics.misses += 1;
                drop(metrics);
                store.remove(&key);
            } else {
                metrics.misses += 1;
            }
        }

        let response = self.inner.process(message).await?;

        let mut store = self.store.lock().await;
        let evicted = store.insert(
            key,
            CacheEntry {
                response: response.clone(),
                expires_at: now + self.config.default_ttl,
            },
            self.config.max_cache_size,
        );
        if evicted > 0 {
            self.metrics.lock().await.evictions += evicted as u64;
        }
        Ok(response)
    }

    /// Streaming bypasses the cache entirely: incremental output isn't a
    /// cacheable unit of response.
    async fn stream(&self, message: Message) -> MessageStream {
        self.inner.stream(message).await
    }

    fn capabilities(&self) -> Vec<String> {
        self.inner.capabilities()
    }
}

fn json_canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), json_canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(json_canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct CountingAgent {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn name(&self) -> &str {
            "counter"
        }

        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(message)
        }
    }

    #[tokio::test]
    async fn second_identical_request_is_a_cache_hit() {
        let agent = Arc::new(CountingAgent {
            calls: AtomicU32::new(0),
        });
        let cache = CachingDecorator::new(
            agent.clone(),
            CachingConfig::new(10, Duration::from_secs(60)).unwrap(),
        );

        let msg = Message::new("user", json!("hello"));
        cache.process(msg.clone()).await.unwrap();
        cache.process(msg).await.unwrap();

        assert_eq!(agent.calls.load(AtomicOrdering::SeqCst), 1);
        let metrics = cache.metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_a_miss() {
        let agent = Arc::new(CountingAgent {
            calls: AtomicU32::new(0),
        });
        let cache = CachingDecorator::new(
            agent.clone(),
            CachingConfig::new(10, Duration::from_millis(10)).unwrap(),
        );
        let msg = Message::new("user", json!("hello"));
        cache.process(msg.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.process(msg).await.unwrap();

        assert_eq!(agent.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn eviction_respects_max_cache_size() {
        let agent = Arc::new(CountingAgent {
            calls: AtomicU32::new(0),
        });
        let cache = CachingDecorator::new(
            agent,
            CachingConfig::new(2, Duration::from_secs(60)).unwrap(),
        );
        cache.process(Message::new("user", json!("a"))).await.unwrap();
        cache.process(Message::new("user", json!("b"))).await.unwrap();
        cache.process(Message::new("user", json!("c"))).await.unwrap();

        assert_eq!(cache.get_cache_size().await, 2);
        assert_eq!(cache.metrics().await.evictions, 1);
    }

    #[tokio::test]
    async fn invalidate_without_message_clears_everything() {
        let agent = Arc::new(CountingAgent {
            calls: AtomicU32::new(0),
        });
        let cache = CachingDecorator::new(
            agent,
            CachingConfig::new(10, Duration::from_secs(60)).unwrap(),
        );
        cache.process(Message::new("user", json!("a"))).await.unwrap();
        cache.invalidate(None).await;
        assert_eq!(cache.get_cache_size().await, 0);
    }
}

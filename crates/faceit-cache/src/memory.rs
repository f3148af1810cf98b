//! In-process TTL cache with an optional external tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use faceit_models::{AnalysisResponse, CacheStatus};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fingerprint::Fingerprint;
use crate::store::KvStore;

/// Cache limits.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    /// Prefix for keys in the external store
    pub store_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 100,
            store_prefix: "faceit:cache:".to_string(),
        }
    }
}

/// What happened to a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// Cache full; existing entries were kept
    Rejected,
}

struct CacheEntry {
    value: AnalysisResponse,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded TTL cache of analysis responses.
///
/// When full, new keys are rejected instead of evicting older entries.
/// Expired entries are dropped on access and by [`ResultCache::sweep`].
pub struct ResultCache {
    config: CacheConfig,
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    store: Option<Arc<dyn KvStore>>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Attach an external store if it answers a ping. An unreachable store is
    /// logged and the cache stays in-memory only.
    pub async fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        match store.ping().await {
            Ok(()) => {
                info!("Result cache backed by external store");
                self.store = Some(store);
            }
            Err(e) => {
                warn!("Cache store unreachable, using in-memory cache only: {}", e);
            }
        }
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    fn store_key(&self, key: &Fingerprint) -> String {
        format!("{}{}", self.config.store_prefix, key)
    }

    /// Look up a result. Expired entries are removed and reported as misses.
    pub async fn get(&self, key: &Fingerprint) -> Option<AnalysisResponse> {
        {
            let mut entries = self.entries.write().await;
            let expired = match entries.get(key) {
                Some(entry) if entry.is_expired(Instant::now()) => true,
                Some(entry) => return Some(entry.value.clone()),
                None => false,
            };
            if expired {
                debug!("Cache entry {} expired", key);
                entries.remove(key);
                return None;
            }
        }

        self.get_from_store(key).await
    }

    async fn get_from_store(&self, key: &Fingerprint) -> Option<AnalysisResponse> {
        let store = self.store.as_ref()?;
        let store_key = self.store_key(key);

        let raw = match store.get(&store_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Cache store read failed for {}: {}", key, e);
                return None;
            }
        };
        let value: AnalysisResponse = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                return None;
            }
        };

        let remaining = match store.ttl(&store_key).await {
            Ok(Some(secs)) => Duration::from_secs(secs).min(self.config.ttl),
            _ => self.config.ttl,
        };
        if !remaining.is_zero() {
            let mut entries = self.entries.write().await;
            if entries.len() < self.config.max_entries {
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        value: value.clone(),
                        expires_at: Instant::now() + remaining,
                    },
                );
            }
        }

        Some(value)
    }

    /// Store a result. Replacing an existing key always succeeds; a new key
    /// is rejected once `max_entries` live entries are held.
    pub async fn put(&self, key: Fingerprint, value: AnalysisResponse) -> PutOutcome {
        let serialized = if self.store.is_some() {
            serde_json::to_string(&value).ok()
        } else {
            None
        };

        {
            let mut entries = self.entries.write().await;
            let now = Instant::now();
            entries.retain(|_, e| !e.is_expired(now));

            if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
                warn!(
                    "Result cache full ({} entries), not caching {}",
                    entries.len(),
                    key
                );
                return PutOutcome::Rejected;
            }

            entries.insert(
                key.clone(),
                CacheEntry {
                    value,
                    expires_at: now + self.config.ttl,
                },
            );
        }

        if let (Some(store), Some(raw)) = (&self.store, serialized) {
            if let Err(e) = store
                .set_ex(&self.store_key(&key), &raw, self.config.ttl.as_secs().max(1))
                .await
            {
                warn!("Cache store write failed for {}: {}", key, e);
            }
        }

        PutOutcome::Stored
    }

    /// Empty the cache, returning how many in-memory entries were removed.
    pub async fn clear(&self) -> usize {
        let removed = {
            let mut entries = self.entries.write().await;
            let n = entries.len();
            entries.clear();
            n
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.delete_prefix(&self.config.store_prefix).await {
                warn!("Cache store clear failed: {}", e);
            }
        }

        info!("Cleared {} cache entries", removed);
        removed
    }

    /// Drop expired entries, returning how many went.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Live entries with their remaining TTL in seconds, sorted by key.
    pub async fn status(&self) -> CacheStatus {
        let entries = self.entries.read().await;
        let now = Instant::now();

        let mut live: Vec<(&Fingerprint, u64)> = entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| (k, e.expires_at.saturating_duration_since(now).as_secs()))
            .collect();
        live.sort_by(|a, b| a.0.cmp(b.0));

        CacheStatus {
            size: live.len(),
            keys: live.iter().map(|(k, _)| k.to_string()).collect(),
            ttls: live.iter().map(|(_, ttl)| *ttl).collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Spawn a task that sweeps every `interval` until `shutdown` flips or
    /// its sender is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                if *shutdown.borrow_and_update() {
                    debug!("Cache sweeper stopping");
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            debug!("Cache sweeper stopping, shutdown sender dropped");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let removed = cache.sweep().await;
                        if removed > 0 {
                            debug!("Swept {} expired cache entries", removed);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, CacheResult};
    use async_trait::async_trait;
    use faceit_models::{
        AnalysisConfig, AnalysisSummary, AnalysisType, ProcessingConfigEcho, ResultMetadata,
        VisualizationStyle,
    };
    use std::sync::Mutex;

    fn response(filename: &str) -> AnalysisResponse {
        AnalysisResponse::success(
            AnalysisSummary {
                total_frames: 3,
                faces_detected: 3,
                processing_config: ProcessingConfigEcho {
                    frame_skip: 30,
                    analysis_type: AnalysisType::Combined,
                    detection_threshold: 0.5,
                },
                emotions: None,
                action_units: None,
                emotional_key_moments: Vec::new(),
            },
            VisualizationStyle::Timeline,
            ResultMetadata {
                filename: filename.to_string(),
                processed_at: chrono::Utc::now(),
                detector_version: "test".to_string(),
                cache_key_prefix: "face_".to_string(),
            },
        )
    }

    fn key(content: &[u8]) -> Fingerprint {
        Fingerprint::make_key(content, &AnalysisConfig::default())
    }

    fn cache(ttl: Duration, max_entries: usize) -> ResultCache {
        ResultCache::new(CacheConfig {
            ttl,
            max_entries,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = cache(Duration::from_secs(60), 10);
        let value = response("a.mp4");

        assert_eq!(cache.put(key(b"a"), value.clone()).await, PutOutcome::Stored);
        assert_eq!(cache.get(&key(b"a")).await, Some(value));
        assert_eq!(cache.get(&key(b"b")).await, None);
    }

    #[tokio::test]
    async fn test_expired_entries_purged_on_get() {
        let cache = cache(Duration::from_millis(30), 10);
        cache.put(key(b"a"), response("a.mp4")).await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&key(b"a")).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_full_cache_rejects_new_keys() {
        let cache = cache(Duration::from_secs(60), 2);
        cache.put(key(b"a"), response("a.mp4")).await;
        cache.put(key(b"b"), response("b.mp4")).await;

        assert_eq!(cache.put(key(b"c"), response("c.mp4")).await, PutOutcome::Rejected);
        assert_eq!(cache.status().await.size, 2);
        assert!(cache.get(&key(b"c")).await.is_none());
        assert!(cache.get(&key(b"a")).await.is_some());

        // existing keys can still be refreshed
        assert_eq!(cache.put(key(b"a"), response("a2.mp4")).await, PutOutcome::Stored);
    }

    #[tokio::test]
    async fn test_clear_returns_count() {
        let cache = cache(Duration::from_secs(60), 10);
        cache.put(key(b"a"), response("a.mp4")).await;
        cache.put(key(b"b"), response("b.mp4")).await;

        assert_eq!(cache.clear().await, 2);
        assert_eq!(cache.clear().await, 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_status_lists_keys_and_ttls() {
        let cache = cache(Duration::from_secs(300), 10);
        cache.put(key(b"a"), response("a.mp4")).await;

        let status = cache.status().await;
        assert_eq!(status.size, 1);
        assert_eq!(status.keys, vec![key(b"a").to_string()]);
        assert!(status.ttls[0] <= 300 && status.ttls[0] >= 298);
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired() {
        let cache = Arc::new(cache(Duration::from_millis(20), 10));
        cache.put(key(b"a"), response("a.mp4")).await;

        let (tx, rx) = watch::channel(false);
        let handle = cache.spawn_sweeper(Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.len().await, 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_sender_dropped() {
        let cache = Arc::new(cache(Duration::from_secs(60), 10));
        let (tx, rx) = watch::channel(false);
        let handle = cache.spawn_sweeper(Duration::from_millis(10), rx);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop once its sender is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_already_signalled() {
        let cache = Arc::new(cache(Duration::from_secs(60), 10));
        let (tx, rx) = watch::channel(true);
        let handle = cache.spawn_sweeper(Duration::from_millis(10), rx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop on a raised flag")
            .unwrap();
        drop(tx);
    }

    #[derive(Default)]
    struct MapStore {
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl KvStore for MapStore {
        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> CacheResult<()> {
            self.values.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn ttl(&self, _key: &str) -> CacheResult<Option<u64>> {
            Ok(Some(120))
        }

        async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
            let mut values = self.values.lock().unwrap();
            let before = values.len();
            values.retain(|k, _| !k.starts_with(prefix));
            Ok(before - values.len())
        }

        async fn ping(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> CacheResult<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn ttl(&self, _key: &str) -> CacheResult<Option<u64>> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> CacheResult<usize> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn ping(&self) -> CacheResult<()> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_tier_shared_between_caches() {
        let store: Arc<dyn KvStore> = Arc::new(MapStore::default());
        let writer = cache(Duration::from_secs(60), 10).with_store(Arc::clone(&store)).await;
        let reader = cache(Duration::from_secs(60), 10).with_store(Arc::clone(&store)).await;
        assert!(writer.has_store());

        let value = response("a.mp4");
        writer.put(key(b"a"), value.clone()).await;

        assert_eq!(reader.get(&key(b"a")).await, Some(value));
        assert_eq!(reader.len().await, 1);

        writer.clear().await;
        assert!(store.get(&format!("faceit:cache:{}", key(b"a"))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_memory() {
        let cache = cache(Duration::from_secs(60), 10)
            .with_store(Arc::new(DownStore))
            .await;
        assert!(!cache.has_store());

        cache.put(key(b"a"), response("a.mp4")).await;
        assert!(cache.get(&key(b"a")).await.is_some());
    }
}

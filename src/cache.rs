//! Content-addressed embedding cache.
//!
//! Keys are the SHA-256 of the text, so identical text always maps to the
//! same key and, once cached, the same vector. Entries live in an LRU capped
//! at `cache.max_size`.
//!
//! Concurrent misses for the same key are coalesced: the first caller
//! registers an in-flight slot and holds its lock while the provider runs;
//! later callers wait on that slot instead of issuing a duplicate call.
//!
//! Failures are reported per text. A failing batch call is retried text by
//! text so one bad input cannot poison the rest of the batch.

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::CacheConfig;
use crate::embedding::EmbeddingProvider;

/// A cached vector. Shared, never mutated after creation.
pub type Embedding = Arc<Vec<f32>>;

/// Outcome for one text. The error is a message so it can be cloned to
/// every duplicate of a failing text.
pub type EmbedResult = Result<Embedding, String>;

type Slot = Arc<AsyncMutex<Option<Embedding>>>;

/// Maximum number of keys reported by [`EmbeddingCache::stats`].
const STATS_SAMPLE: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub capacity: usize,
    /// Lifetime counters; [`EmbeddingCache::clear`] does not reset them.
    pub hits: u64,
    pub misses: u64,
    pub sample_keys: Vec<String>,
}

/// A key this caller is embedding on behalf of everyone else.
///
/// Dropping the claim unregisters the key before releasing the slot, whether
/// the embed finished or the owning future was cancelled mid-call. Waiters
/// that then see an empty slot embed on their own.
struct InflightClaim<'a> {
    cache: &'a EmbeddingCache,
    key: String,
    text: String,
    slot: OwnedMutexGuard<Option<Embedding>>,
}

impl Drop for InflightClaim<'_> {
    fn drop(&mut self) {
        self.cache.lock_inflight().remove(&self.key);
    }
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    enabled: bool,
    batch_size: usize,
    entries: Mutex<LruCache<String, Embedding>>,
    inflight: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hex SHA-256 of the text.
pub fn content_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &CacheConfig, batch_size: usize) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            enabled: config.enabled,
            batch_size: batch_size.max(1),
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Embed one text, using the cache when possible.
    pub async fn get(&self, text: &str) -> anyhow::Result<Embedding> {
        self.get_many(&[text.to_string()])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| Err("empty embedding response".to_string()))
            .map_err(|e| anyhow::anyhow!(e))
    }

    /// Embed many texts; the result is aligned with `texts`.
    pub async fn get_many(&self, texts: &[String]) -> Vec<EmbedResult> {
        let keys: Vec<String> = texts.iter().map(|t| content_key(t)).collect();

        let resolved = if self.enabled {
            self.resolve_cached(&keys, texts).await
        } else {
            self.resolve_uncached(&keys, texts).await
        };

        keys.iter()
            .map(|key| {
                resolved
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| Err("embedding missing from batch result".to_string()))
            })
            .collect()
    }

    async fn resolve_uncached(
        &self,
        keys: &[String],
        texts: &[String],
    ) -> HashMap<String, EmbedResult> {
        let mut seen = HashSet::new();
        let mut unique_keys = Vec::new();
        let mut unique_texts = Vec::new();
        for (key, text) in keys.iter().zip(texts) {
            if seen.insert(key.as_str()) {
                unique_keys.push(key.clone());
                unique_texts.push(text.clone());
            }
        }
        self.misses
            .fetch_add(unique_keys.len() as u64, Ordering::Relaxed);

        let results = self.embed_batch(&unique_texts).await;
        unique_keys.into_iter().zip(results).collect()
    }

    async fn resolve_cached(&self, keys: &[String], texts: &[String]) -> HashMap<String, EmbedResult> {
        let mut resolved: HashMap<String, EmbedResult> = HashMap::new();
        let mut owned: Vec<InflightClaim<'_>> = Vec::new();
        let mut waiting: Vec<(String, String, Slot)> = Vec::new();

        // Entries then in-flight, always in that order.
        {
            let mut entries = self.lock_entries();
            let mut inflight = self.lock_inflight();
            let mut seen = HashSet::new();

            for (key, text) in keys.iter().zip(texts) {
                if !seen.insert(key.as_str()) {
                    continue;
                }
                if let Some(hit) = entries.get(key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    resolved.insert(key.clone(), Ok(hit.clone()));
                    continue;
                }
                self.misses.fetch_add(1, Ordering::Relaxed);

                if let Some(slot) = inflight.get(key) {
                    waiting.push((key.clone(), text.clone(), slot.clone()));
                    continue;
                }

                let slot: Slot = Arc::new(AsyncMutex::new(None));
                match slot.clone().try_lock_owned() {
                    Ok(guard) => {
                        inflight.insert(key.clone(), slot);
                        owned.push(InflightClaim {
                            cache: self,
                            key: key.clone(),
                            text: text.clone(),
                            slot: guard,
                        });
                    }
                    Err(_) => waiting.push((key.clone(), text.clone(), slot)),
                }
            }
        }

        if !owned.is_empty() {
            tracing::debug!(count = owned.len(), "embedding cache misses");
            let batch: Vec<String> = owned.iter().map(|claim| claim.text.clone()).collect();
            let results = self.embed_batch(&batch).await;

            for (mut claim, result) in owned.into_iter().zip(results) {
                if let Ok(vector) = &result {
                    *claim.slot = Some(vector.clone());
                    self.lock_entries().put(claim.key.clone(), vector.clone());
                }
                resolved.insert(claim.key.clone(), result);
            }
        }

        for (key, text, slot) in waiting {
            let filled = slot.lock().await.clone();
            let result = match filled {
                Some(vector) => Ok(vector),
                // The owner failed; try once more on our own.
                None => {
                    let result = self.embed_one(&text).await;
                    if let Ok(vector) = &result {
                        self.lock_entries().put(key.clone(), vector.clone());
                    }
                    result
                }
            };
            resolved.insert(key, result);
        }

        resolved
    }

    /// Call the provider in `batch_size` chunks; a failed chunk is retried
    /// one text at a time.
    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbedResult> {
        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            match self.provider.embed(chunk).await {
                Ok(vectors) if vectors.len() == chunk.len() => {
                    results.extend(vectors.into_iter().map(|v| Ok(Arc::new(v))));
                }
                Ok(vectors) => {
                    tracing::warn!(
                        expected = chunk.len(),
                        got = vectors.len(),
                        "embedding batch returned wrong count; retrying per text"
                    );
                    for text in chunk {
                        results.push(self.embed_one(text).await);
                    }
                }
                Err(e) => {
                    if chunk.len() > 1 {
                        tracing::warn!(error = %e, "embedding batch failed; retrying per text");
                        for text in chunk {
                            results.push(self.embed_one(text).await);
                        }
                    } else {
                        results.push(Err(e.to_string()));
                    }
                }
            }
        }

        results
    }

    async fn embed_one(&self, text: &str) -> EmbedResult {
        let input = [text.to_string()];
        match self.provider.embed(&input).await {
            Ok(mut vectors) if vectors.len() == 1 => Ok(Arc::new(vectors.remove(0))),
            Ok(vectors) => Err(format!(
                "embedding provider returned {} vectors for 1 text",
                vectors.len()
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Drop every cached vector.
    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock_entries();
        CacheStats {
            enabled: self.enabled,
            size: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sample_keys: entries
                .iter()
                .take(STATS_SAMPLE)
                .map(|(key, _)| key.clone())
                .collect(),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, LruCache<String, Embedding>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records every call; fails any batch containing a text with "bad".
    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<Vec<String>>>,
        delay_ms: u64,
    }

    impl RecordingProvider {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
        fn texts_embedded(&self) -> usize {
            self.calls().iter().map(|c| c.len()).sum()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.to_vec());
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if texts.iter().any(|t| t.contains("bad")) {
                bail!("provider rejected input");
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.bytes().next().unwrap_or(0) as f32])
                .collect())
        }
    }

    fn cache_with(provider: Arc<RecordingProvider>, max_size: usize) -> EmbeddingCache {
        EmbeddingCache::new(
            provider,
            &CacheConfig {
                enabled: true,
                max_size,
            },
            64,
        )
    }

    #[test]
    fn test_content_key_is_stable() {
        assert_eq!(content_key("firewall"), content_key("firewall"));
        assert_ne!(content_key("firewall"), content_key("Firewall"));
        assert_eq!(content_key("").len(), 64);
    }

    #[tokio::test]
    async fn test_repeat_lookup_hits_cache() {
        let provider = Arc::new(RecordingProvider::default());
        let cache = cache_with(provider.clone(), 100);

        let first = cache.get("encrypt data at rest").await.unwrap();
        let second = cache.get("encrypt data at rest").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls().len(), 1);
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_clear_resets_size() {
        let provider = Arc::new(RecordingProvider::default());
        let cache = cache_with(provider.clone(), 100);
        cache
            .get_many(&["a1".to_string(), "b2".to_string()])
            .await;
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().size, 0);

        cache.get("a1").await.unwrap();
        assert_eq!(provider.texts_embedded(), 3);
    }

    #[tokio::test]
    async fn test_lru_cap_evicts_oldest() {
        let provider = Arc::new(RecordingProvider::default());
        let cache = cache_with(provider.clone(), 2);

        cache.get("one").await.unwrap();
        cache.get("two").await.unwrap();
        cache.get("three").await.unwrap();
        assert_eq!(cache.len(), 2);

        // "one" was evicted, so it costs another provider call.
        cache.get("one").await.unwrap();
        assert_eq!(provider.texts_embedded(), 4);
        cache.get("three").await.unwrap();
        assert_eq!(provider.texts_embedded(), 4);
    }

    #[tokio::test]
    async fn test_duplicates_in_one_batch_embedded_once() {
        let provider = Arc::new(RecordingProvider::default());
        let cache = cache_with(provider.clone(), 100);
        let texts = vec!["same".to_string(), "other".to_string(), "same".to_string()];

        let results = cache.get_many(&texts).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], results[2]);
        assert_eq!(provider.calls(), vec![vec!["same".to_string(), "other".to_string()]]);
    }

    #[tokio::test]
    async fn test_failed_batch_isolated_per_text() {
        let provider = Arc::new(RecordingProvider::default());
        let cache = cache_with(provider.clone(), 100);
        let texts = vec!["good one".to_string(), "bad one".to_string(), "good two".to_string()];

        let results = cache.get_many(&texts).await;

        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().contains("rejected"));
        assert!(results[2].is_ok());
        // Failures are not cached.
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let provider = Arc::new(RecordingProvider {
            delay_ms: 50,
            ..Default::default()
        });
        let cache = Arc::new(cache_with(provider.clone(), 100));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get("access review").await.unwrap()
            }));
        }
        let mut vectors = Vec::new();
        for handle in handles {
            vectors.push(handle.await.unwrap());
        }

        assert!(vectors.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_owner_releases_inflight_key() {
        let provider = Arc::new(RecordingProvider {
            delay_ms: 200,
            ..Default::default()
        });
        let cache = Arc::new(cache_with(provider.clone(), 100));

        let owner = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("mfa for admins").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        owner.abort();
        assert!(owner.await.unwrap_err().is_cancelled());
        assert_eq!(provider.calls().len(), 1);
        assert!(cache.lock_inflight().is_empty());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get("mfa for admins").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(provider.calls().len(), 2);
        assert!(cache.lock_inflight().is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_calls_provider() {
        let provider = Arc::new(RecordingProvider::default());
        let cache = EmbeddingCache::new(
            provider.clone(),
            &CacheConfig {
                enabled: false,
                max_size: 0,
            },
            64,
        );

        cache.get("mfa").await.unwrap();
        cache.get("mfa").await.unwrap();

        assert_eq!(provider.calls().len(), 2);
        assert_eq!(cache.len(), 0);
        assert!(!cache.stats().enabled);
    }

    #[tokio::test]
    async fn test_stats_sample_is_bounded() {
        let provider = Arc::new(RecordingProvider::default());
        let cache = cache_with(provider, 100);
        let texts: Vec<String> = (0..25).map(|i| format!("control text {}", i)).collect();
        cache.get_many(&texts).await;

        let stats = cache.stats();
        assert_eq!(stats.size, 25);
        assert_eq!(stats.sample_keys.len(), STATS_SAMPLE);
        assert_eq!(stats.capacity, 100);
    }
}

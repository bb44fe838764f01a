use std::{
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;
use tokio::sync::RwLock as TokioRwLock;

// Cached audio response
#[derive(Clone)]
struct CachedAudio {
    audio: Vec<u8>,
    cached_at: Instant,
}

/// LRU of synthesized narrations keyed by voice, model and text, with a TTL.
pub(crate) struct NarrationCache {
    entries: TokioRwLock<LruCache<String, CachedAudio>>,
    ttl: Duration,
}

impl NarrationCache {
    /// `None` when `capacity` is zero, which disables caching.
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            entries: TokioRwLock::new(LruCache::new(capacity)),
            ttl,
        })
    }

    pub(crate) fn key(voice_id: &str, model_id: &str, text: &str) -> String {
        format!("{voice_id}\u{1f}{model_id}\u{1f}{text}")
    }

    pub(crate) async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().await;
        let cached = entries.peek(key)?;
        if cached.cached_at.elapsed() < self.ttl {
            Some(cached.audio.clone())
        } else {
            None
        }
    }

    pub(crate) async fn put(&self, key: String, audio: Vec<u8>) {
        let mut entries = self.entries.write().await;
        entries.put(
            key,
            CachedAudio {
                audio,
                cached_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_disables_cache() {
        assert!(NarrationCache::new(0, Duration::from_secs(60)).is_none());
    }

    #[tokio::test]
    async fn test_hit_and_eviction() {
        let cache = NarrationCache::new(1, Duration::from_secs(60)).unwrap();
        cache.put("a".into(), vec![1, 2, 3]).await;
        assert_eq!(cache.get("a").await, Some(vec![1, 2, 3]));

        cache.put("b".into(), vec![4]).await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(vec![4]));
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = NarrationCache::new(4, Duration::ZERO).unwrap();
        cache.put("a".into(), vec![1]).await;
        assert_eq!(cache.get("a").await, None);
    }

    #[test]
    fn test_key_separates_voices() {
        assert_ne!(
            NarrationCache::key("voice-a", "m", "hello"),
            NarrationCache::key("voice-b", "m", "hello")
        );
    }
}

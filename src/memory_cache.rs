//! Process-local memory tier backed by Moka

use moka::future::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{CacheConfig, CacheKey, WrappedRecord};

#[derive(Clone)]
struct Slot {
    epoch: u64,
    value: Arc<WrappedRecord>,
}

/// Fastest tier, lost on restart. Trust in its contents is gated by
/// [`crate::CacheValidity`], not by the cache itself.
///
/// `clear` bumps an epoch instead of walking the map: entries written before
/// the bump are never returned again and age out through capacity or TTL.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<CacheKey, Slot>,
    epoch: Arc<AtomicU64>,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.l1_max_capacity);
        if let Some(ttl) = config.l1_ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            entries: builder.build(),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<WrappedRecord>> {
        let slot = self.entries.get(key).await?;
        (slot.epoch == self.epoch.load(Ordering::Acquire)).then_some(slot.value)
    }

    pub async fn set(&self, key: CacheKey, value: WrappedRecord) {
        let slot = Slot {
            epoch: self.epoch.load(Ordering::Acquire),
            value: Arc::new(value),
        };
        self.entries.insert(key, slot).await;
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Approximate entry count, including cleared entries not yet evicted
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordData, RecordPayload, Source};

    fn record(id: &str) -> WrappedRecord {
        WrappedRecord::new(
            RecordData::Single(RecordPayload::new("posts").with_id(id)),
            Source::Cache,
        )
    }

    #[tokio::test]
    async fn test_set_get_clear() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let key = CacheKey::new("cache:", "posts");

        assert!(cache.get(&key).await.is_none());
        cache.set(key.clone(), record("1")).await;
        assert_eq!(cache.get(&key).await.as_deref(), Some(&record("1")));

        cache.clear();
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_set_after_clear_is_visible() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let key = CacheKey::new("cache:", "posts");

        cache.set(key.clone(), record("old")).await;
        cache.clear();
        cache.set(key.clone(), record("new")).await;

        assert_eq!(cache.get(&key).await.as_deref(), Some(&record("new")));
    }
}

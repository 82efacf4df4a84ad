//! The two-tier cache: a [`MemoryTier`] in front of a [`DiskTier`], composed behind
//! one generic public API.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, JsonCodec};
use crate::config::TierCacheConfig;
use crate::error::CacheError;
use crate::events::{EventListener, EventSource};
use crate::hasher::{Blake3Hasher, Hasher};
use crate::key::CacheKey;
use crate::memory::MemoryTier;
use crate::disk::DiskTier;

/// A read-through, write-through two-tier cache keyed by string keys and generic
/// over the stored value type `T`.
///
/// Writes land in both tiers. Reads probe memory first; a disk hit is promoted into
/// memory before being returned, so a key's second read is served from memory. A
/// memory hit never touches disk and never changes the memory tier's internal
/// ordering — a read alone does not move an entry to the head of its LRU list.
pub struct HybridCache<C = JsonCodec, H = Blake3Hasher> {
    memory: Arc<MemoryTier>,
    disk: DiskTier<C, H>,
    codec: C,
}

impl HybridCache<JsonCodec, Blake3Hasher> {
    /// Builds a cache from a [`TierCacheConfig`], using the default JSON codec and
    /// BLAKE3 hasher. The disk tier's directory is created if absent.
    pub fn new(config: TierCacheConfig) -> Result<Self, CacheError> {
        Self::with_collaborators(config, JsonCodec, Blake3Hasher)
    }
}

impl<C, H> HybridCache<C, H>
where
    C: Codec + Clone + Send + Sync + 'static,
    H: Hasher + Send + Sync + 'static,
{
    /// Builds a cache with explicit [`Codec`] and [`Hasher`] collaborators.
    pub fn with_collaborators(config: TierCacheConfig, codec: C, hasher: H) -> Result<Self, CacheError> {
        let dir = config.cache_dir();
        let memory = Arc::new(MemoryTier::new(config.memory));
        let disk = DiskTier::new(&dir, config.disk, codec.clone(), hasher)?;
        Ok(Self { memory, disk, codec })
    }

    /// Registers this cache's memory tier to react to host lifecycle events (memory
    /// pressure, background transitions) delivered by `source`.
    pub fn listen(&self, source: &(impl EventSource + ?Sized)) {
        source.subscribe(Arc::clone(&self.memory) as Arc<dyn EventListener>);
    }

    /// Direct access to the disk tier, for callers that need to bypass the memory
    /// tier entirely (e.g. to seed disk-only state in a test) or force an immediate
    /// maintenance pass via [`crate::disk::DiskTier::maintain_now`].
    pub fn disk_tier(&self) -> &DiskTier<C, H> {
        &self.disk
    }

    /// Writes `value` under `key` with the given `cost`, to both tiers. A no-op if
    /// `key` is empty: [`CacheKey`] rejects it before either tier, or the codec, is
    /// touched.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, cost: u64) {
        if CacheKey::new(key).is_none() {
            tracing::warn!("hybrid cache set: rejected empty key");
            return;
        }

        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, key, "hybrid cache set: encode failed");
                return;
            }
        };
        self.memory.set(key, bytes, cost);
        self.disk.set(key, value, cost).await;
    }

    /// Synchronous write to the memory tier only, mirrored to disk in the
    /// background. Use when the caller cannot await the disk write but still wants
    /// it to eventually land (matches `DiskTier::set_async`'s fire-and-forget shape).
    pub fn set_async<T>(&self, key: impl Into<String>, value: T, cost: u64)
    where
        T: Serialize + Send + 'static,
    {
        let key = key.into();
        if CacheKey::new(&key).is_none() {
            tracing::warn!("hybrid cache set_async: rejected empty key");
            return;
        }

        let bytes = match self.codec.encode(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, key, "hybrid cache set_async: encode failed");
                return;
            }
        };
        self.memory.set(&key, bytes, cost);
        self.disk.set_async(key, value, cost, |_| {});
    }

    /// Reads `key`, checking memory first and falling back to disk. A disk hit is
    /// decoded, promoted into the memory tier, and returned — so a repeat read of
    /// the same key is served from memory. Returns `None` for an empty `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        CacheKey::new(key)?;

        if let Some(bytes) = self.memory.get(key) {
            return self.codec.decode(&bytes).ok();
        }

        let bytes = self.disk.get_bytes(key).await?;
        let value: T = self.codec.decode(&bytes).ok()?;
        self.memory.set(key, bytes, 0);
        Some(value)
    }

    /// Fire-and-forget variant of [`HybridCache::get`]. `on_done` runs once the
    /// lookup (memory, then disk-with-promotion) completes, and always receives the
    /// value actually retrieved rather than one captured before the disk read
    /// resolved. Invoked immediately with `None` for an empty `key`.
    pub fn get_async<T>(&self, key: impl Into<String>, on_done: impl FnOnce(Option<T>) + Send + 'static)
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.into();
        if CacheKey::new(&key).is_none() {
            on_done(None);
            return;
        }

        if let Some(bytes) = self.memory.get(&key) {
            on_done(self.codec.decode(&bytes).ok());
            return;
        }

        let memory = Arc::clone(&self.memory);
        let codec = self.codec.clone();
        self.disk.get_bytes_async(key, move |key, bytes: Option<Vec<u8>>| {
            let value = bytes.and_then(|bytes| {
                let value: Option<T> = codec.decode(&bytes).ok();
                if value.is_some() {
                    memory.set(&key, bytes, 0);
                }
                value
            });
            on_done(value);
        });
    }

    /// Whether `key` is resident in either tier. Always `false` for an empty key.
    pub async fn contains(&self, key: &str) -> bool {
        if CacheKey::new(key).is_none() {
            return false;
        }
        self.memory.contains(key) || self.disk.contains(key).await
    }

    /// Whether `key` is resident in the memory tier specifically, without
    /// consulting disk. Useful for observing promotion/eviction behavior at the
    /// tier boundary rather than the cache's combined view.
    pub fn in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    /// Removes `key` from both tiers. A no-op if `key` is empty.
    pub async fn remove(&self, key: &str) {
        if CacheKey::new(key).is_none() {
            return;
        }
        self.memory.remove(key);
        self.disk.remove(key).await;
    }

    /// Clears both tiers entirely.
    pub async fn clear(&self) {
        self.memory.clear();
        self.disk.clear().await;
    }

    /// Aggregate cost resident, as tracked by the disk tier — the durable source of
    /// truth, since the memory tier is rebuilt empty on process restart while the
    /// disk tier persists.
    pub async fn total_cost(&self) -> u64 {
        self.disk.total_cost().await
    }

    /// Number of entries resident, as tracked by the disk tier.
    pub async fn total_count(&self) -> i64 {
        self.disk.total_count().await
    }
}

/// Convenience constructor for tests and simple embedders that don't need a full
/// [`TierCacheConfig`]: builds a cache rooted at `dir` with default limits.
pub fn open_default(dir: &Path) -> Result<HybridCache, CacheError> {
    let mut config = TierCacheConfig::default();
    config.root = dir.to_path_buf();
    config.app_id = "default".to_string();
    HybridCache::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiskConfig, MemoryConfig};

    fn config(dir: &Path) -> TierCacheConfig {
        TierCacheConfig {
            root: dir.to_path_buf(),
            app_id: "test".to_string(),
            memory: MemoryConfig {
                cost_limit: 0,
                count_limit: 0,
                auto_purge_on_memory_warning: true,
                auto_purge_on_background: true,
            },
            disk: DiskConfig {
                cost_limit: 0,
                count_limit: 0,
                inline_threshold: 20 * 1024,
                max_cache_period_seconds: 7 * 24 * 60 * 60,
                auto_interval_seconds: 3600,
            },
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HybridCache::new(config(dir.path())).unwrap();
        cache.set("a", &"hello".to_string(), 5).await;
        let value: Option<String> = cache.get("a").await;
        assert_eq!(value, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn disk_hit_is_promoted_into_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HybridCache::new(config(dir.path())).unwrap();
        // write directly to disk, bypassing memory, to simulate a cold memory tier
        cache.disk.set("k", &"value".to_string(), 1).await;
        assert!(!cache.memory.contains("k"));

        let value: Option<String> = cache.get("k").await;
        assert_eq!(value, Some("value".to_string()));
        assert!(cache.memory.contains("k"));
    }

    #[tokio::test]
    async fn empty_key_is_rejected_by_every_operation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HybridCache::new(config(dir.path())).unwrap();

        cache.set("", &"1".to_string(), 1).await;
        assert!(!cache.contains("").await);
        let value: Option<String> = cache.get("").await;
        assert_eq!(value, None);
        cache.remove("").await; // must not panic
    }

    #[tokio::test]
    async fn remove_clears_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HybridCache::new(config(dir.path())).unwrap();
        cache.set("a", &"1".to_string(), 1).await;
        cache.remove("a").await;
        assert!(!cache.contains("a").await);
    }

    #[tokio::test]
    async fn clear_wipes_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HybridCache::new(config(dir.path())).unwrap();
        cache.set("a", &"1".to_string(), 1).await;
        cache.clear().await;
        assert!(!cache.contains("a").await);
        assert_eq!(cache.total_count().await, 0);
    }

    #[tokio::test]
    async fn get_async_promotes_disk_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HybridCache::new(config(dir.path())).unwrap();
        cache.disk.set("k", &"value".to_string(), 1).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        cache.get_async::<String>("k", move |value| {
            let _ = tx.send(value);
        });
        let value = rx.await.unwrap();
        assert_eq!(value, Some("value".to_string()));
        assert!(cache.memory.contains("k"));
    }

    #[tokio::test]
    async fn persists_across_reopen_of_same_directory() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = HybridCache::new(config(dir.path())).unwrap();
            cache.set("a", &"1".to_string(), 1).await;
        }
        let cache = HybridCache::new(config(dir.path())).unwrap();
        let value: Option<String> = cache.get("a").await;
        assert_eq!(value, Some("1".to_string()));
    }
}

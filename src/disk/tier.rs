//! The disk tier: [`DiskStore`] behind a `tokio` mutex plus a periodic maintenance
//! task. Generic over the [`Codec`] and [`Hasher`] collaborators so callers can swap
//! serialization format or digest algorithm without touching this module.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::codec::Codec;
use crate::config::DiskConfig;
use crate::disk::store::DiskStore;
use crate::error::CacheError;
use crate::hasher::Hasher;
use crate::key::CacheKey;

struct Inner<C, H> {
    store: Mutex<DiskStore>,
    config: DiskConfig,
    codec: C,
    hasher: H,
}

/// The disk-backed cache tier. Exposes both synchronous (directly `.await`ed) and
/// asynchronous (fire-and-forget via `tokio::spawn`, completion invoked on that
/// task) variants of every operation.
///
/// `DiskTier` owns a recurring maintenance task (trim by cost, then count, then
/// age) that runs every `config.auto_interval_seconds` for the lifetime of the
/// tier; dropping the tier aborts it.
pub struct DiskTier<C, H> {
    inner: Arc<Inner<C, H>>,
    maintenance: JoinHandle<()>,
}

impl<C, H> Drop for DiskTier<C, H> {
    fn drop(&mut self) {
        self.maintenance.abort();
    }
}

impl<C, H> DiskTier<C, H>
where
    C: Codec + Send + Sync + 'static,
    H: Hasher + Send + Sync + 'static,
{
    /// Opens the store at `dir` and starts the periodic maintenance task.
    pub fn new(dir: &Path, config: DiskConfig, codec: C, hasher: H) -> Result<Self, CacheError> {
        let store = DiskStore::open(dir)?;
        let inner = Arc::new(Inner {
            store: Mutex::new(store),
            config,
            codec,
            hasher,
        });

        let maintenance = {
            let inner = Arc::clone(&inner);
            tokio::spawn(Self::maintenance_loop(inner))
        };

        Ok(Self { inner, maintenance })
    }

    async fn maintenance_loop(inner: Arc<Inner<C, H>>) {
        let period = Duration::from_secs(inner.config.auto_interval_seconds.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let mut store = inner.store.lock().await;
            Self::run_maintenance(&inner.config, &mut store);
        }
    }

    fn run_maintenance(config: &DiskConfig, store: &mut DiskStore) {
        Self::trim_cost(config, store);
        Self::trim_count(config, store);
        Self::remove_expired(config, store);
    }

    /// Runs one maintenance pass (cost trim, count trim, expiry) immediately,
    /// instead of waiting for the next `auto_interval_seconds` tick. Useful for
    /// callers that want deterministic trimming, e.g. before reporting disk usage.
    pub async fn maintain_now(&self) {
        let mut store = self.inner.store.lock().await;
        Self::run_maintenance(&self.inner.config, &mut store);
    }

    /// Repeatedly removes the oldest entries until total size is within
    /// `config.cost_limit` or a removal pass makes no progress.
    fn trim_cost(config: &DiskConfig, store: &DiskStore) {
        if config.cost_limit == 0 {
            return;
        }
        let mut total = match store.total_size() {
            Ok(v) => v.max(0) as u64,
            Err(e) => {
                warn!(error = %e, "disk cost trim: failed to read total size");
                return;
            }
        };

        let mut progressed = true;
        while total > config.cost_limit && progressed {
            progressed = false;
            let items = match store.oldest_items(16) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "disk cost trim: failed to list oldest items");
                    return;
                }
            };
            if items.is_empty() {
                break;
            }
            for item in items {
                if total <= config.cost_limit {
                    break;
                }
                match store.remove(&item.key) {
                    Ok(()) => {
                        total = total.saturating_sub(item.size.max(0) as u64);
                        progressed = true;
                    }
                    Err(e) => warn!(error = %e, key = %item.key, "disk cost trim: remove failed"),
                }
            }
            if let Err(e) = store.checkpoint() {
                warn!(error = %e, "disk cost trim: checkpoint failed");
            }
        }
    }

    /// Repeatedly removes the oldest entries until the row count is within
    /// `config.count_limit` or a removal pass makes no progress.
    fn trim_count(config: &DiskConfig, store: &DiskStore) {
        if config.count_limit == 0 {
            return;
        }
        let mut total = match store.total_count() {
            Ok(v) => v.max(0) as u64,
            Err(e) => {
                warn!(error = %e, "disk count trim: failed to read total count");
                return;
            }
        };

        let mut progressed = true;
        while total > config.count_limit && progressed {
            progressed = false;
            let items = match store.oldest_items(16) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "disk count trim: failed to list oldest items");
                    return;
                }
            };
            if items.is_empty() {
                break;
            }
            for item in items {
                if total <= config.count_limit {
                    break;
                }
                match store.remove(&item.key) {
                    Ok(()) => {
                        total = total.saturating_sub(1);
                        progressed = true;
                    }
                    Err(e) => warn!(error = %e, key = %item.key, "disk count trim: remove failed"),
                }
            }
            if let Err(e) = store.checkpoint() {
                warn!(error = %e, "disk count trim: checkpoint failed");
            }
        }
    }

    /// Deletes every entry whose `last_access_time` is older than
    /// `now - config.max_cache_period_seconds`.
    fn remove_expired(config: &DiskConfig, store: &DiskStore) {
        let cutoff = now_secs() - config.max_cache_period_seconds as i64;
        let filenames = match store.expired_filenames(cutoff) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "expiry trim: failed to list expired sidecar files");
                return;
            }
        };
        for filename in &filenames {
            if let Err(e) = store.remove_sidecar_file(filename) {
                warn!(error = %e, filename, "expiry trim: failed to remove sidecar file");
            }
        }
        if let Err(e) = store.delete_expired(cutoff) {
            warn!(error = %e, "expiry trim: failed to delete expired rows");
        }
    }

    fn inline_filename(&self, key: &str, cost: u64) -> Option<String> {
        (cost > self.inner.config.inline_threshold).then(|| self.inner.hasher.digest(key))
    }

    async fn write_bytes(inner: &Inner<C, H>, key: &str, bytes: &[u8], filename: Option<&str>) {
        let store = inner.store.lock().await;
        if let Err(e) = store.write(key, bytes, filename) {
            error!(error = %e, key, "disk write failed");
        }
    }

    /// Encodes `value` and writes it, choosing inline vs. sidecar storage by
    /// comparing `cost` to `config.inline_threshold`. Blocks the caller only for the
    /// duration of the encode and the locked write. A no-op if `key` is empty.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, cost: u64) {
        let Some(key) = CacheKey::new(key) else {
            warn!("disk tier set: rejected empty key");
            return;
        };
        let key = key.as_str();

        let bytes = match self.inner.codec.encode(value) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, key, "encode failed, write skipped");
                return;
            }
        };
        let filename = self.inline_filename(key, cost);
        Self::write_bytes(&self.inner, key, &bytes, filename.as_deref()).await;
    }

    /// Fire-and-forget variant of [`DiskTier::set`]; `on_done` runs on the spawned
    /// task once the write completes (or is skipped due to an encode failure or an
    /// empty key).
    pub fn set_async<T>(
        &self,
        key: impl Into<String>,
        value: T,
        cost: u64,
        on_done: impl FnOnce(String) + Send + 'static,
    ) where
        T: Serialize + Send + 'static,
    {
        let key = key.into();
        if CacheKey::new(&key).is_none() {
            warn!("disk tier set_async: rejected empty key");
            on_done(key);
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let bytes = match inner.codec.encode(&value) {
                Ok(b) => b,
                Err(e) => {
                    error!(error = %e, key, "encode failed, write skipped");
                    on_done(key);
                    return;
                }
            };
            let filename = (cost > inner.config.inline_threshold)
                .then(|| inner.hasher.digest(&key));
            Self::write_bytes(&inner, &key, &bytes, filename.as_deref()).await;
            on_done(key);
        });
    }

    /// Reads and decodes the value stored for `key`, or `None` if absent (including
    /// when `key` is empty). A decode failure is a programmer error: it is logged
    /// and treated as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_bytes(key).await?;
        match self.inner.codec.decode(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(error = %e, key, "decode failed");
                None
            }
        }
    }

    /// Reads the raw bytes stored for `key` without decoding, or `None` if `key` is
    /// empty. Used by [`crate::hybrid::HybridCache`] to promote disk hits into the
    /// memory tier without an extra decode/re-encode round trip.
    pub async fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let key = CacheKey::new(key)?;
        let store = self.inner.store.lock().await;
        match store.read(key.as_str()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, key = key.as_str(), "disk read failed");
                None
            }
        }
    }

    /// Fire-and-forget variant of [`DiskTier::get_bytes`]; `on_done` receives the
    /// key and the raw bytes (or `None`) once the read completes. Used by
    /// [`crate::hybrid::HybridCache::get_async`], which decodes the bytes itself so
    /// it can also promote them into the memory tier without re-encoding.
    pub fn get_bytes_async(
        &self,
        key: impl Into<String>,
        on_done: impl FnOnce(String, Option<Vec<u8>>) + Send + 'static,
    ) {
        let key = key.into();
        if CacheKey::new(&key).is_none() {
            on_done(key, None);
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let bytes = {
                let store = inner.store.lock().await;
                match store.read(&key) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(error = %e, key, "disk read failed");
                        None
                    }
                }
            };
            on_done(key, bytes);
        });
    }

    /// Fire-and-forget variant of [`DiskTier::get`]; `on_done` receives the key and
    /// the decoded value (or `None`) once the read completes.
    pub fn get_async<T>(
        &self,
        key: impl Into<String>,
        on_done: impl FnOnce(String, Option<T>) + Send + 'static,
    ) where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.into();
        if CacheKey::new(&key).is_none() {
            on_done(key, None);
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let bytes = {
                let store = inner.store.lock().await;
                match store.read(&key) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(error = %e, key, "disk read failed");
                        None
                    }
                }
            };
            let value = bytes.and_then(|bytes| match inner.codec.decode(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    error!(error = %e, key, "decode failed");
                    None
                }
            });
            on_done(key, value);
        });
    }

    /// Whether `key` is resident on disk. Always `false` for an empty key.
    pub async fn contains(&self, key: &str) -> bool {
        let Some(key) = CacheKey::new(key) else {
            return false;
        };
        let store = self.inner.store.lock().await;
        store.contains(key.as_str()).unwrap_or_else(|e| {
            error!(error = %e, key = key.as_str(), "disk contains check failed");
            false
        })
    }

    /// Fire-and-forget variant of [`DiskTier::contains`].
    pub fn contains_async(
        &self,
        key: impl Into<String>,
        on_done: impl FnOnce(String, bool) + Send + 'static,
    ) {
        let key = key.into();
        if CacheKey::new(&key).is_none() {
            on_done(key, false);
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let store = inner.store.lock().await;
            let present = store.contains(&key).unwrap_or_else(|e| {
                error!(error = %e, key, "disk contains check failed");
                false
            });
            drop(store);
            on_done(key, present);
        });
    }

    /// Removes `key`, if present. A no-op if `key` is empty.
    pub async fn remove(&self, key: &str) {
        let Some(key) = CacheKey::new(key) else {
            return;
        };
        let store = self.inner.store.lock().await;
        if let Err(e) = store.remove(key.as_str()) {
            error!(error = %e, key = key.as_str(), "disk remove failed");
        }
    }

    /// Fire-and-forget variant of [`DiskTier::remove`].
    pub fn remove_async(&self, key: impl Into<String>, on_done: impl FnOnce(String) + Send + 'static) {
        let key = key.into();
        if CacheKey::new(&key).is_none() {
            on_done(key);
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let store = inner.store.lock().await;
            if let Err(e) = store.remove(&key) {
                error!(error = %e, key, "disk remove failed");
            }
            drop(store);
            on_done(key);
        });
    }

    /// Wipes the entire disk tier: database, sidecar files, and directory, then
    /// recreates an empty store in place.
    pub async fn clear(&self) {
        let mut store = self.inner.store.lock().await;
        if let Err(e) = store.remove_all() {
            error!(error = %e, "disk clear failed");
        }
    }

    /// Fire-and-forget variant of [`DiskTier::clear`].
    pub fn clear_async(&self, on_done: impl FnOnce() + Send + 'static) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut store = inner.store.lock().await;
            if let Err(e) = store.remove_all() {
                error!(error = %e, "disk clear failed");
            }
            drop(store);
            on_done();
        });
    }

    /// Aggregate cost of every resident entry, as tracked by the disk store. The
    /// public [`crate::HybridCache::total_cost`]/`total_count` are sourced from here
    /// rather than the memory tier, since the disk tier is the durable source of
    /// truth that survives a process restart.
    pub async fn total_cost(&self) -> u64 {
        let store = self.inner.store.lock().await;
        store.total_size().unwrap_or_else(|e| {
            error!(error = %e, "failed to read total disk cost");
            0
        }).max(0) as u64
    }

    /// Number of entries resident on disk.
    pub async fn total_count(&self) -> i64 {
        let store = self.inner.store.lock().await;
        store.total_count().unwrap_or_else(|e| {
            error!(error = %e, "failed to read total disk count");
            0
        })
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

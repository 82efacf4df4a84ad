//! A two-tier (memory + disk) key-value object cache.
//!
//! A [`HybridCache`] composes an in-memory [`memory::MemoryTier`] (an
//! [`lru::IntrusiveLru`] behind a lock, with cost/count limits and event-driven
//! self-purge) in front of a disk-backed [`disk::DiskTier`] (an embedded SQLite
//! database plus sidecar files for large values, maintained by a periodic
//! background task). Writes land in both tiers; reads check memory first and
//! promote a disk hit into memory. Serialization and key hashing are pluggable via
//! the [`codec::Codec`] and [`hasher::Hasher`] traits.
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use tiercache::{HybridCache, TierCacheConfig};
//!
//! let cache = HybridCache::new(TierCacheConfig::default())?;
//! cache.set("greeting", &"hello".to_string(), 16).await;
//! let value: Option<String> = cache.get("greeting").await;
//! assert_eq!(value.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod disk;
pub mod error;
pub mod events;
pub mod hasher;
pub mod hybrid;
pub mod key;
pub mod lru;
pub mod memory;

pub use codec::{Codec, JsonCodec};
pub use config::{DiskConfig, MemoryConfig, TierCacheConfig};
pub use error::CacheError;
pub use events::{EventListener, EventSource};
pub use hasher::{Blake3Hasher, Hasher};
pub use hybrid::{open_default, HybridCache};
pub use key::CacheKey;

//! Configuration for the two-tier cache.
//!
//! `TierCacheConfig` aggregates every tunable the memory and disk tiers expose,
//! mirroring how `aerolithdb-core::config::AerolithsConfig` layers its subsystem
//! configs.
//!
//! Sources, in order of precedence (lowest to highest):
//! 1. [`TierCacheConfig::default`]
//! 2. an optional TOML/JSON file passed to [`TierCacheConfig::load`]
//! 3. environment variables prefixed `TIERCACHE_`, e.g. `TIERCACHE_MEMORY__COST_LIMIT`

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

/// Root configuration object for a [`crate::HybridCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCacheConfig {
    /// Directory under which `diskcache.<app_id>/` is created.
    pub root: std::path::PathBuf,

    /// Identifier appended to the cache directory name, so multiple caches with
    /// distinct purposes can share a root without colliding.
    pub app_id: String,

    /// In-memory tier limits and event-driven purge behavior.
    pub memory: MemoryConfig,

    /// Disk tier limits, inline threshold, and maintenance schedule.
    pub disk: DiskConfig,
}

impl Default for TierCacheConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            app_id: "default".to_string(),
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
        }
    }
}

impl TierCacheConfig {
    /// Loads configuration by layering defaults, an optional file at `path`, and
    /// environment variables prefixed `TIERCACHE_`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` exists but cannot be parsed, or if an environment
    /// override cannot be coerced to the expected type.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TIERCACHE")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Directory that will hold the sqlite database and sidecar files:
    /// `<root>/diskcache.<app_id>/`.
    pub fn cache_dir(&self) -> std::path::PathBuf {
        self.root.join(format!("diskcache.{}", self.app_id))
    }
}

/// Limits and purge behavior for [`crate::memory::MemoryTier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum total cost resident in memory. Zero disables cost-based trimming.
    pub cost_limit: u64,

    /// Maximum number of resident entries. Zero disables count-based trimming.
    pub count_limit: u64,

    /// Clear the memory tier when the host reports memory pressure.
    pub auto_purge_on_memory_warning: bool,

    /// Clear the memory tier when the host reports a background transition.
    pub auto_purge_on_background: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cost_limit: 200 * MIB,
            count_limit: 0,
            auto_purge_on_memory_warning: true,
            auto_purge_on_background: true,
        }
    }
}

/// Limits and maintenance schedule for [`crate::disk::tier::DiskTier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Maximum total cost resident on disk. Zero disables cost-based trimming.
    pub cost_limit: u64,

    /// Maximum number of resident entries. Zero disables count-based trimming.
    pub count_limit: u64,

    /// Cost boundary above which a value is stored as a sidecar file rather than an
    /// inline blob.
    pub inline_threshold: u64,

    /// Entries untouched for longer than this are evicted by `remove_expired`.
    pub max_cache_period_seconds: u64,

    /// Interval between periodic maintenance ticks.
    pub auto_interval_seconds: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            cost_limit: 500 * MIB,
            count_limit: 0,
            inline_threshold: 20 * KIB,
            max_cache_period_seconds: 7 * 24 * 60 * 60,
            auto_interval_seconds: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = TierCacheConfig::default();
        assert_eq!(config.memory.cost_limit, 200 * MIB);
        assert_eq!(config.memory.count_limit, 0);
        assert!(config.memory.auto_purge_on_memory_warning);
        assert!(config.memory.auto_purge_on_background);

        assert_eq!(config.disk.cost_limit, 500 * MIB);
        assert_eq!(config.disk.count_limit, 0);
        assert_eq!(config.disk.inline_threshold, 20 * KIB);
        assert_eq!(config.disk.max_cache_period_seconds, 604_800);
        assert_eq!(config.disk.auto_interval_seconds, 120);
    }

    #[test]
    fn cache_dir_joins_root_and_app_id_once() {
        let mut config = TierCacheConfig::default();
        config.root = std::path::PathBuf::from("/tmp/example");
        config.app_id = "my-app".to_string();
        assert_eq!(
            config.cache_dir(),
            std::path::PathBuf::from("/tmp/example/diskcache.my-app")
        );
    }
}

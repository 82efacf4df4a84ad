//! The in-memory tier: an [`IntrusiveLru`] behind a mutex, enforcing cost and count
//! limits and reacting to host memory-pressure / background-entry events.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::MemoryConfig;
use crate::events::EventListener;
use crate::key::CacheKey;
use crate::lru::IntrusiveLru;

/// Synchronous, blocking in-memory cache tier. None of its operations suspend.
pub struct MemoryTier {
    config: MemoryConfig,
    lru: Mutex<IntrusiveLru<Vec<u8>>>,
}

impl MemoryTier {
    /// Creates an empty tier with the given limits and purge policy.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            lru: Mutex::new(IntrusiveLru::new()),
        }
    }

    /// Inserts or overwrites `key`. If present, the value and cost are replaced and
    /// the node is moved to the head; otherwise a new node is inserted at the head.
    /// Trims by count, then by cost, looping until each limit holds rather than
    /// evicting a single entry per call.
    pub fn set(&self, key: &str, value: Vec<u8>, cost: u64) {
        let Some(key) = CacheKey::new(key) else {
            warn!("memory tier set: rejected empty key");
            return;
        };
        let key = key.as_str();

        let mut lru = self.lru.lock();
        match lru.lookup(key) {
            Some(id) => {
                lru.update(id, value, cost);
                lru.move_to_head(id);
            }
            None => {
                lru.insert_at_head(key, value, cost);
            }
        }
        Self::trim_count(&self.config, &mut lru);
        Self::trim_cost(&self.config, &mut lru);
    }

    /// Returns the value for `key` without touching recency. This tier's "LRU" is
    /// really "least-recently-written": reads do not promote a node to the head.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let key = CacheKey::new(key)?;
        let lru = self.lru.lock();
        let id = lru.lookup(key.as_str())?;
        Some(lru.value(id).clone())
    }

    /// Whether `key` is currently resident.
    pub fn contains(&self, key: &str) -> bool {
        let Some(key) = CacheKey::new(key) else {
            return false;
        };
        self.lru.lock().lookup(key.as_str()).is_some()
    }

    /// Removes `key`, if present. A no-op otherwise, including when `key` is empty.
    pub fn remove(&self, key: &str) {
        let Some(key) = CacheKey::new(key) else {
            return;
        };
        let mut lru = self.lru.lock();
        if let Some(id) = lru.lookup(key.as_str()) {
            lru.remove(id);
        }
    }

    /// Drops every resident entry.
    pub fn clear(&self) {
        self.lru.lock().clear();
    }

    /// Aggregate cost of all resident entries.
    pub fn total_cost(&self) -> u64 {
        self.lru.lock().total_cost()
    }

    /// Number of resident entries.
    pub fn total_count(&self) -> u64 {
        self.lru.lock().total_count()
    }

    fn trim_count(config: &MemoryConfig, lru: &mut IntrusiveLru<Vec<u8>>) {
        if config.count_limit == 0 {
            return;
        }
        while lru.total_count() > config.count_limit {
            if lru.remove_tail().is_none() {
                break;
            }
        }
    }

    fn trim_cost(config: &MemoryConfig, lru: &mut IntrusiveLru<Vec<u8>>) {
        if config.cost_limit == 0 {
            return;
        }
        while lru.total_cost() > config.cost_limit {
            if lru.remove_tail().is_none() {
                break;
            }
        }
    }
}

impl EventListener for MemoryTier {
    fn on_memory_warning(&self) {
        if self.config.auto_purge_on_memory_warning {
            debug!("memory tier purging on memory-warning event");
            self.clear();
        }
    }

    fn on_background_entry(&self) {
        if self.config.auto_purge_on_background {
            debug!("memory tier purging on background-entry event");
            self.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(cost_limit: u64, count_limit: u64) -> MemoryTier {
        MemoryTier::new(MemoryConfig {
            cost_limit,
            count_limit,
            auto_purge_on_memory_warning: true,
            auto_purge_on_background: true,
        })
    }

    #[test]
    fn set_then_get_returns_latest_value() {
        let tier = tier(0, 0);
        tier.set("a", b"1".to_vec(), 0);
        assert_eq!(tier.get("a"), Some(b"1".to_vec()));
        tier.set("a", b"2".to_vec(), 0);
        assert_eq!(tier.get("a"), Some(b"2".to_vec()));
    }

    #[test]
    fn get_does_not_promote_recency() {
        let tier = tier(0, 2);
        tier.set("a", b"A".to_vec(), 0);
        tier.set("b", b"B".to_vec(), 0);
        // "a" is read but not promoted; it is still the least-recently-written entry.
        tier.get("a");
        tier.set("c", b"C".to_vec(), 0);
        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
        assert!(tier.contains("c"));
    }

    #[test]
    fn count_limit_evicts_oldest_write() {
        let tier = tier(0, 2);
        tier.set("k1", b"1".to_vec(), 0);
        tier.set("k2", b"2".to_vec(), 0);
        tier.set("k3", b"3".to_vec(), 0);
        assert_eq!(tier.total_count(), 2);
        assert!(!tier.contains("k1"));
        assert!(tier.contains("k2"));
        assert!(tier.contains("k3"));
    }

    #[test]
    fn cost_limit_loops_until_within_budget() {
        let tier = tier(10, 0);
        // successive writes must not leave the tier above budget even though each
        // individual write only adds one entry over the limit.
        tier.set("a", b"x".to_vec(), 4);
        tier.set("b", b"x".to_vec(), 4);
        tier.set("c", b"x".to_vec(), 4);
        assert!(tier.total_cost() <= 10);
    }

    #[test]
    fn remove_then_contains_is_false() {
        let tier = tier(0, 0);
        tier.set("a", b"1".to_vec(), 0);
        tier.remove("a");
        assert!(!tier.contains("a"));
    }

    #[test]
    fn empty_key_is_rejected_everywhere() {
        let tier = tier(0, 0);
        tier.set("", b"1".to_vec(), 0);
        assert_eq!(tier.total_count(), 0);
        assert!(!tier.contains(""));
        assert_eq!(tier.get(""), None);
        tier.remove(""); // must not panic
    }

    #[test]
    fn clear_drops_everything() {
        let tier = tier(0, 0);
        tier.set("a", b"1".to_vec(), 1);
        tier.set("b", b"2".to_vec(), 1);
        tier.clear();
        assert_eq!(tier.total_count(), 0);
        assert_eq!(tier.total_cost(), 0);
    }

    #[test]
    fn memory_warning_event_clears_when_enabled() {
        let tier = tier(0, 0);
        tier.set("a", b"1".to_vec(), 1);
        tier.on_memory_warning();
        assert_eq!(tier.total_count(), 0);
    }

    #[test]
    fn memory_warning_event_is_noop_when_disabled() {
        let tier = MemoryTier::new(MemoryConfig {
            cost_limit: 0,
            count_limit: 0,
            auto_purge_on_memory_warning: false,
            auto_purge_on_background: false,
        });
        tier.set("a", b"1".to_vec(), 1);
        tier.on_memory_warning();
        tier.on_background_entry();
        assert_eq!(tier.total_count(), 1);
    }

    #[test]
    fn invariant_count_and_cost_track_arena_state() {
        let tier = tier(0, 0);
        tier.set("a", b"1".to_vec(), 3);
        tier.set("b", b"22".to_vec(), 5);
        assert_eq!(tier.total_count(), 2);
        assert_eq!(tier.total_cost(), 8);
        tier.remove("a");
        assert_eq!(tier.total_count(), 1);
        assert_eq!(tier.total_cost(), 5);
    }
}

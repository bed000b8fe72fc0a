//! Resolved-rights cache with generation stamping
//!
//! Resolved rights depend on rosters, the policy tree, the group tree and
//! group membership. Rather than tracking which entries each mutation
//! touches, every mutation bumps a shared [`Generation`]; an entry is
//! only served while the generation it was computed at is current.

use crate::config::CacheConfig;
use crate::right::Right;
use crate::types::{Actor, PolicyId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Monotonic mutation counter shared by the managers
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    /// Create a new counter
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current value
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Mark every cached resolution as stale
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedEntry {
    rights: Right,
    generation: u64,
}

/// Cache of resolved rights per (policy, actor)
pub struct RightsCache {
    entries: DashMap<(PolicyId, Actor), CachedEntry>,
    generation: Arc<Generation>,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    stale: AtomicUsize,
}

impl RightsCache {
    /// Create a cache bound to a generation counter
    pub fn new(config: &CacheConfig, generation: Arc<Generation>) -> Self {
        Self {
            entries: DashMap::new(),
            generation,
            capacity: config.capacity.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            stale: AtomicUsize::new(0),
        }
    }

    /// Generation to stamp a resolution with; read it before resolving
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// Get a resolution that is still current
    pub fn get(&self, policy_id: PolicyId, actor: &Actor) -> Option<Right> {
        let key = (policy_id, *actor);
        let current = self.generation.current();

        if let Some(entry) = self.entries.get(&key) {
            if entry.generation == current {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.rights);
            }

            drop(entry);
            self.entries.remove(&key);
            self.stale.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a resolution computed at `generation`
    pub fn put(&self, policy_id: PolicyId, actor: Actor, rights: Right, generation: u64) {
        if generation != self.generation.current() {
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict();
        }

        self.entries
            .insert((policy_id, actor), CachedEntry { rights, generation });
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            entries: self.entries.len(),
            max_entries: self.capacity,
        }
    }

    // Stale entries go first; if that frees nothing, drop everything.
    fn evict(&self) {
        let current = self.generation.current();
        self.entries.retain(|_, entry| entry.generation == current);
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub stale: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.stale;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> (RightsCache, Arc<Generation>) {
        let generation = Generation::new();
        let config = CacheConfig {
            enabled: true,
            capacity,
        };
        (RightsCache::new(&config, Arc::clone(&generation)), generation)
    }

    #[test]
    fn test_put_get() {
        let (cache, _) = cache(16);
        assert!(cache.get(1, &Actor::user(1)).is_none());

        let stamp = cache.generation();
        cache.put(1, Actor::user(1), Right::VIEW, stamp);
        assert_eq!(cache.get(1, &Actor::user(1)), Some(Right::VIEW));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_bump_invalidates() {
        let (cache, generation) = cache(16);
        cache.put(1, Actor::user(1), Right::VIEW, cache.generation());

        generation.bump();
        assert!(cache.get(1, &Actor::user(1)).is_none());
        assert_eq!(cache.stats().stale, 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_outdated_put_ignored() {
        let (cache, generation) = cache(16);
        let stamp = cache.generation();
        generation.bump();

        cache.put(1, Actor::user(1), Right::VIEW, stamp);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_capacity_bounded() {
        let (cache, _) = cache(4);
        for id in 0..10 {
            cache.put(1, Actor::user(id), Right::VIEW, cache.generation());
        }
        assert!(cache.stats().entries <= 4);
    }
}

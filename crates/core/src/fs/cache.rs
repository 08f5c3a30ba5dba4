//! Time-bounded existence cache
//!
//! Maps a logical path to the verdict of its last resolution. Negative
//! verdicts are cached too, so repeated lookups of missing names stay local.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// How long a verdict is trusted by default
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// What the last resolution of a path found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub exists: bool,
    pub is_dir: bool,
}

impl Presence {
    pub const ABSENT: Presence = Presence {
        exists: false,
        is_dir: false,
    };
    pub const FILE: Presence = Presence {
        exists: true,
        is_dir: false,
    };
    pub const DIRECTORY: Presence = Presence {
        exists: true,
        is_dir: true,
    };
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    presence: Presence,
    observed_at: Instant,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub size: usize,
}

/// Concurrent path → presence map with a fixed validity window
#[derive(Debug)]
pub struct ExistenceCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for ExistenceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ExistenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: Default::default(),
            misses: Default::default(),
            invalidations: Default::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Verdict for `path` if one was observed within the window
    pub fn get(&self, path: &str) -> Option<Presence> {
        let fresh = self.entries.get(path).map(|entry| {
            (
                entry.presence,
                entry.observed_at.elapsed() < self.ttl,
            )
        });

        match fresh {
            Some((presence, true)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(presence)
            }
            Some((_, false)) => {
                self.entries
                    .remove_if(path, |_, entry| entry.observed_at.elapsed() >= self.ttl);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Record a verdict, replacing any earlier one
    pub fn insert(&self, path: impl Into<String>, presence: Presence) {
        self.entries.insert(
            path.into(),
            CacheEntry {
                presence,
                observed_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, path: &str) {
        if self.entries.remove(path).is_some() {
            self.invalidations
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop `path` and every cached path below it
    pub fn invalidate_tree(&self, path: &str) {
        let prefix = format!("{path}/");
        let before = self.entries.len();
        self.entries
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        let removed = before.saturating_sub(self.entries.len()) as u64;
        self.invalidations
            .fetch_add(removed, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ExistenceCache::default();
        cache.insert("a/b", Presence::FILE);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("a/b"), Some(Presence::FILE));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("a/b"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_refreshes_timestamp() {
        let cache = ExistenceCache::new(Duration::from_secs(10));
        cache.insert("x", Presence::ABSENT);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("x", Presence::DIRECTORY);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("x"), Some(Presence::DIRECTORY));
    }

    #[test]
    fn test_invalidate_tree() {
        let cache = ExistenceCache::default();
        cache.insert("a", Presence::DIRECTORY);
        cache.insert("a/b", Presence::FILE);
        cache.insert("a/c/d", Presence::FILE);
        cache.insert("ab", Presence::FILE);

        cache.invalidate_tree("a");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("ab"), Some(Presence::FILE));
        assert_eq!(cache.stats().invalidations, 3);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = ExistenceCache::default();
        assert!(cache.get("missing").is_none());
        cache.insert("here", Presence::FILE);
        assert!(cache.get("here").is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }
}

use dashmap::DashMap;
use tracing::debug;

use crate::types::DisambiguationResult;
use crate::TARGET_RESOLVER;

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Cache key: the context dimensions a memoized decision depends on.
/// Results are a deterministic function of (inputs, gazetteer snapshot),
/// so entries never need invalidation, only bounding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub normalized_mention: String,
    pub publisher_domain: Option<String>,
    pub last_region_id: Option<u64>,
}

/// Bounded memoization layered in front of single-mention resolution.
/// Entries are immutable once written; when the map reaches capacity it
/// is flushed wholesale rather than tracking per-entry recency.
#[derive(Debug)]
pub struct ResolutionCache {
    entries: DashMap<CacheKey, DisambiguationResult>,
    capacity: usize,
}

impl ResolutionCache {
    pub fn new(capacity: usize) -> Self {
        ResolutionCache {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<DisambiguationResult> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn insert(&self, key: CacheKey, result: DisambiguationResult) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            debug!(
                target: TARGET_RESOLVER,
                "Resolution cache at capacity ({}), flushing", self.capacity
            );
            self.entries.clear();
        }
        self.entries.insert(key, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

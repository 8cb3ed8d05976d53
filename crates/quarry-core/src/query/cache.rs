//! Execution plan cache.
//!
//! Plans are keyed by the canonical SQL text of their statement. Parameter
//! values are not part of the key: plans only refer to parameters by name
//! and resolve them when they start.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::debug;

use super::plan::SelectExecutionPlan;

/// Cached plan with metadata.
#[derive(Debug)]
pub struct CachedPlan {
    /// The plan. Never executed directly, only copied.
    pub plan: SelectExecutionPlan,
    /// Schema version the plan was built against.
    pub schema_version: u64,
    /// When this plan was created (microseconds since Unix epoch).
    pub created_at: u64,
    /// Number of cache hits for this plan.
    pub hit_count: AtomicU64,
}

impl CachedPlan {
    /// Create a new cached plan.
    pub fn new(plan: SelectExecutionPlan, schema_version: u64) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        Self {
            plan,
            schema_version,
            created_at: now,
            hit_count: AtomicU64::new(0),
        }
    }

    /// Increment the hit count and return the new value.
    pub fn record_hit(&self) -> u64 {
        self.hit_count.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    /// Get the current hit count.
    pub fn hits(&self) -> u64 {
        self.hit_count.load(AtomicOrdering::Relaxed)
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Capacity-bounded plan cache with least-hit eviction.
///
/// Thread-safe; shared by all executions against one database. Entries built
/// against an older schema version are treated as misses.
#[derive(Debug)]
pub struct PlanCache {
    cache: RwLock<HashMap<String, CachedPlan>>,
    max_entries: usize,
    stats: CacheStats,
}

impl PlanCache {
    /// Create a cache holding at most `max_entries` plans. Zero disables it.
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Copy of the cached plan for `sql`, if built against `schema_version`.
    pub fn get(&self, sql: &str, schema_version: u64) -> Option<SelectExecutionPlan> {
        let guard = self.cache.read();
        match guard.get(sql) {
            Some(cached) if cached.schema_version == schema_version => {
                cached.record_hit();
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                Some(cached.plan.copy())
            }
            _ => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                None
            }
        }
    }

    /// Whether a current plan is cached for `sql`. Does not count as a hit.
    pub fn contains(&self, sql: &str, schema_version: u64) -> bool {
        self.cache
            .read()
            .get(sql)
            .is_some_and(|c| c.schema_version == schema_version)
    }

    /// Cache a copy of `plan`. Plans with non-cacheable steps are refused.
    ///
    /// Returns whether the plan was stored.
    pub fn insert(&self, sql: String, plan: &SelectExecutionPlan, schema_version: u64) -> bool {
        if self.max_entries == 0 || !plan.can_be_cached() {
            return false;
        }
        let cached = CachedPlan::new(plan.copy(), schema_version);
        let mut guard = self.cache.write();
        guard.retain(|_, c| c.schema_version == schema_version);
        if guard.len() >= self.max_entries && !guard.contains_key(&sql) {
            self.evict_least_used(&mut guard);
        }
        guard.insert(sql, cached);
        true
    }

    /// Drop every plan built against a schema version other than `schema_version`.
    pub fn invalidate(&self, schema_version: u64) {
        self.cache
            .write()
            .retain(|_, c| c.schema_version == schema_version);
    }

    fn evict_least_used(&self, cache: &mut HashMap<String, CachedPlan>) {
        let evict_key = cache
            .iter()
            .min_by_key(|(_, v)| v.hits())
            .map(|(k, _)| k.clone());

        if let Some(key) = evict_key {
            debug!(statement = %key, "evicting cached plan");
            cache.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the current number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

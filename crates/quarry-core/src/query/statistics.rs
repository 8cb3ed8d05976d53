//! Index cardinality statistics for cost-based planning.
//!
//! Every indexed fetch reports how many entries it produced when its
//! stream closes. The planner reads the smoothed value back as the cost of
//! using the same index with the same condition shape again.

use dashmap::DashMap;

/// Exponentially-weighted moving averages of index fetch cardinality.
///
/// Shared by all executions. Updates are approximate: concurrent pushes to
/// the same key may overwrite each other, which only delays convergence.
#[derive(Debug)]
pub struct QueryStats {
    values: DashMap<String, i64>,
    weight: f64,
}

impl Default for QueryStats {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl QueryStats {
    /// Create an empty table. `weight` is the share of the newest
    /// observation in the average.
    pub fn new(weight: f64) -> Self {
        Self {
            values: DashMap::new(),
            weight: weight.clamp(f64::EPSILON, 1.0),
        }
    }

    /// Key of an index used with `key_fields` key conditions, the last being
    /// a range or not, with or without a second range bound.
    pub fn index_key(index: &str, key_fields: usize, range: bool, additional_range: bool) -> String {
        format!("index.{index}.{key_fields}.{range}.{additional_range}")
    }

    /// Smoothed cardinality, if ever observed.
    pub fn estimate(&self, key: &str) -> Option<i64> {
        self.values.get(key).map(|v| *v)
    }

    /// Record an observation.
    pub fn push(&self, key: &str, value: i64) {
        let weight = self.weight;
        self.values
            .entry(key.to_string())
            .and_modify(|old| {
                *old = (*old as f64 * (1.0 - weight) + value as f64 * weight).round() as i64;
            })
            .or_insert(value);
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was observed yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Forget every observation.
    pub fn clear(&self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_is_taken_as_is() {
        let stats = QueryStats::new(0.5);
        let key = QueryStats::index_key("Person.age", 1, true, false);
        assert_eq!(stats.estimate(&key), None);
        stats.push(&key, 100);
        assert_eq!(stats.estimate(&key), Some(100));
    }

    #[test]
    fn test_ewma_smoothing() {
        let stats = QueryStats::new(0.5);
        stats.push("k", 100);
        stats.push("k", 0);
        assert_eq!(stats.estimate("k"), Some(50));
        stats.push("k", 50);
        assert_eq!(stats.estimate("k"), Some(50));
    }

    #[test]
    fn test_key_shape() {
        assert_eq!(
            QueryStats::index_key("A.b", 2, true, true),
            "index.A.b.2.true.true"
        );
    }
}

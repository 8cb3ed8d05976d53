//! Execution configuration.

use std::time::Duration;

/// Key of the per-operator heap element budget (sort and distinct buffers).
pub const MAX_HEAP_ELEMENTS_KEY: &str = "query.maxHeapElementsAllowedPerOp";
/// Key of the plan cache capacity.
pub const PLAN_CACHE_SIZE_KEY: &str = "statement.cacheSize";
/// Key of the index usage switch.
pub const USE_INDEXES_KEY: &str = "query.useIndexes";
/// Key of the sort-by-index switch.
pub const USE_INDEX_FOR_SORT_KEY: &str = "query.useIndexForSort";
/// Key of the WHERE flattening cap.
pub const MAX_FLATTENED_BLOCKS_KEY: &str = "query.maxFlattenedBlocks";
/// Key of the default statement timeout.
pub const COMMAND_TIMEOUT_KEY: &str = "command.timeout";
/// Key of the statistics smoothing weight.
pub const STATS_EWMA_WEIGHT_KEY: &str = "query.statsEwmaWeight";

/// Configuration for planning and executing SELECT statements.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Maximum rows a sort or distinct operator may hold. `None` disables the check.
    pub max_heap_elements: Option<usize>,

    /// Number of plans kept by the plan cache. Zero disables caching.
    pub plan_cache_size: usize,

    /// Whether WHERE conditions may be served by indexes.
    pub use_indexes: bool,

    /// Whether ORDER BY may be served by index order.
    pub use_index_for_sort: bool,

    /// Upper bound on AND-blocks produced by flattening a WHERE clause.
    /// Larger disjunctions fall back to a single filter.
    pub max_flattened_blocks: usize,

    /// Timeout applied to statements without a TIMEOUT clause.
    pub default_timeout: Option<Duration>,

    /// Weight of the newest observation in the index cost average.
    pub stats_ewma_weight: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_heap_elements: Some(500_000),
            plan_cache_size: 100,
            use_indexes: true,
            use_index_for_sort: true,
            max_flattened_blocks: 64,
            default_timeout: None,
            stats_ewma_weight: 0.2,
        }
    }
}

impl ExecutionConfig {
    /// Set the heap element budget.
    pub fn max_heap_elements(mut self, max: Option<usize>) -> Self {
        self.max_heap_elements = max;
        self
    }

    /// Set the plan cache capacity.
    pub fn plan_cache_size(mut self, size: usize) -> Self {
        self.plan_cache_size = size;
        self
    }

    /// Enable or disable index usage for WHERE.
    pub fn use_indexes(mut self, enabled: bool) -> Self {
        self.use_indexes = enabled;
        self
    }

    /// Enable or disable index usage for ORDER BY.
    pub fn use_index_for_sort(mut self, enabled: bool) -> Self {
        self.use_index_for_sort = enabled;
        self
    }

    /// Set the flattening cap.
    pub fn max_flattened_blocks(mut self, max: usize) -> Self {
        self.max_flattened_blocks = max;
        self
    }

    /// Set the default timeout.
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the statistics smoothing weight, clamped to `(0, 1]`.
    pub fn stats_ewma_weight(mut self, weight: f64) -> Self {
        self.stats_ewma_weight = weight.clamp(f64::EPSILON, 1.0);
        self
    }
}

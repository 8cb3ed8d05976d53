//! Class and cluster scans.

use serde::{Deserialize, Serialize};
use quarry_sql::Value;

use crate::error::Result;
use crate::query::context::CommandContext;
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::ExecutionStream;

/// Scan the clusters of a class and its subclasses.
///
/// Records come out ordered by cluster id, then position; descending scans
/// reverse both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFromClassStep {
    class: String,
    clusters: Vec<i32>,
    ascending: bool,
    #[serde(skip)]
    base: StepBase,
}

impl FetchFromClassStep {
    /// Scan `clusters`, which belong to `class` or its subclasses.
    pub fn new(class: impl Into<String>, clusters: Vec<i32>, ascending: bool) -> Self {
        Self {
            class: class.into(),
            clusters,
            ascending,
            base: StepBase::default(),
        }
    }

    /// Target class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Scanned clusters in ascending order.
    pub fn clusters(&self) -> &[i32] {
        &self.clusters
    }

    /// Scan direction.
    pub fn is_ascending(&self) -> bool {
        self.ascending
    }
}

impl ExecutionStep for FetchFromClassStep {
    step_common!("FetchFromClassStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        Ok(scan_clusters(ctx, &self.clusters, self.ascending))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "FETCH FROM CLASS {} {:?} {}",
            self.class,
            self.clusters,
            if self.ascending { "ASC" } else { "DESC" }
        )
    }
}

/// Scan an explicit list of clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFromClustersStep {
    clusters: Vec<i32>,
    ascending: bool,
    #[serde(skip)]
    base: StepBase,
}

impl FetchFromClustersStep {
    /// Scan `clusters`.
    pub fn new(mut clusters: Vec<i32>, ascending: bool) -> Self {
        clusters.sort_unstable();
        clusters.dedup();
        Self {
            clusters,
            ascending,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for FetchFromClustersStep {
    step_common!("FetchFromClustersStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        Ok(scan_clusters(ctx, &self.clusters, self.ascending))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("FETCH FROM CLUSTERS {:?}", self.clusters)
    }
}

fn scan_clusters<'a>(
    ctx: &'a CommandContext,
    clusters: &[i32],
    ascending: bool,
) -> ExecutionStream<'a> {
    let db = ctx.db();
    let mut order = clusters.to_vec();
    if !ascending {
        order.reverse();
    }
    let rows = order
        .into_iter()
        .flat_map(move |cluster| db.scan_cluster(cluster, ascending))
        .map(ResultRow::from_record);
    ExecutionStream::from_iterator(rows).interruptible(ctx)
}

/// `SELECT count(*) FROM <class>` answered from cluster sizes.
///
/// Clusters are resolved when the step starts, so the count reflects the
/// records live at that moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountFromClassStep {
    class: String,
    alias: String,
    #[serde(skip)]
    base: StepBase,
}

impl CountFromClassStep {
    /// Count the records of `class` (polymorphic) into column `alias`.
    pub fn new(class: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            alias: alias.into(),
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for CountFromClassStep {
    step_common!("CountFromClassStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let db = ctx.db();
        let schema = db.schema();
        schema.require_class(&self.class)?;
        let count: usize = schema
            .polymorphic_clusters(&self.class)
            .into_iter()
            .map(|cluster| db.cluster_count(cluster))
            .sum();
        Ok(ExecutionStream::once(
            ResultRow::new().with_property(self.alias.clone(), Value::from(count)),
        ))
    }

    fn describe(&self) -> String {
        format!("CALCULATE COUNT OF CLASS {} AS {}", self.class, self.alias)
    }
}

//! Index scans.
//!
//! Index steps emit entry rows (`key`, `rid`); [`GetValueFromIndexEntryStep`]
//! turns them into records.

use quarry_sql::Value;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::query::context::CommandContext;
use crate::query::index_descriptor::{IndexSearchDescriptor, KeyScan};
use crate::query::row::ResultRow;
use crate::query::step::{step_common, ExecutionStep, StepBase};
use crate::query::stream::{ExecutionStream, RowSource};
use crate::rid_set::RidSet;
use crate::storage::{EntryIter, Index, IndexEntry};

/// Name of the key column of entry rows.
pub const KEY_COLUMN: &str = "key";
/// Name of the identity column of entry rows.
pub const RID_COLUMN: &str = "rid";

fn entry_row(entry: IndexEntry) -> ResultRow {
    let key = if entry.key.len() == 1 {
        entry.key.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::List(entry.key)
    };
    ResultRow::new()
        .with_property(KEY_COLUMN, key)
        .with_property(RID_COLUMN, Value::Link(entry.rid))
}

fn open_index<'a>(ctx: &'a CommandContext, name: &str) -> Result<&'a dyn Index> {
    ctx.db()
        .index(name)
        .ok_or_else(|| Error::IndexNotFound(name.to_string()))
}

/// Whether the index may hold several entries for one record.
fn multi_entry(ctx: &CommandContext, index: &dyn Index) -> bool {
    let definition = index.definition();
    definition
        .fields
        .iter()
        .any(|field| ctx.db().schema().is_collection_property(&definition.class, field))
}

/// Range or point scan of one index, driven by a search descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFromIndexStep {
    descriptor: IndexSearchDescriptor,
    ascending: bool,
    #[serde(skip)]
    base: StepBase,
}

impl FetchFromIndexStep {
    /// Scan the index of `descriptor`.
    pub fn new(descriptor: IndexSearchDescriptor, ascending: bool) -> Self {
        Self {
            descriptor,
            ascending,
            base: StepBase::default(),
        }
    }

    /// The descriptor driving the scan.
    pub fn descriptor(&self) -> &IndexSearchDescriptor {
        &self.descriptor
    }
}

impl ExecutionStep for FetchFromIndexStep {
    step_common!("FetchFromIndexStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let index = open_index(ctx, &self.descriptor.index.name)?;
        let scans = self.descriptor.scans(ctx, self.ascending)?;
        debug!(
            index = %self.descriptor.index.name,
            scans = scans.len(),
            ascending = self.ascending,
            "index fetch"
        );
        let source = IndexScanSource {
            ctx,
            index,
            ascending: self.ascending,
            seen: (scans.len() > 1 || multi_entry(ctx, index)).then(RidSet::new),
            scans: scans.into_iter(),
            current: None,
            cost_key: self.descriptor.cost_key(),
            fetched: 0,
        };
        Ok(ExecutionStream::new(source).interruptible(ctx))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "FETCH FROM INDEX {} {}",
            self.descriptor,
            if self.ascending { "ASC" } else { "DESC" }
        )
    }
}

/// Opens key scans one after another. Identities already emitted are
/// suppressed when more than one scan runs or the index has collection
/// fields.
struct IndexScanSource<'a> {
    ctx: &'a CommandContext,
    index: &'a dyn Index,
    ascending: bool,
    scans: std::vec::IntoIter<KeyScan>,
    current: Option<EntryIter<'a>>,
    seen: Option<RidSet>,
    cost_key: String,
    fetched: i64,
}

impl RowSource for IndexScanSource<'_> {
    fn pull(&mut self) -> Result<Option<ResultRow>> {
        loop {
            if let Some(entries) = self.current.as_mut() {
                if let Some(entry) = entries.next() {
                    if let Some(seen) = self.seen.as_mut() {
                        if !seen.insert(entry.rid) {
                            continue;
                        }
                    }
                    self.fetched += 1;
                    return Ok(Some(entry_row(entry)));
                }
                self.current = None;
            }
            match self.scans.next() {
                Some(scan) => self.current = Some(scan.open(self.index, self.ascending)?),
                None => return Ok(None),
            }
        }
    }

    fn close(&mut self) {
        self.current = None;
        self.ctx.stats().push(&self.cost_key, self.fetched);
    }
}

/// Full scan of an index in key order, used to serve ORDER BY without WHERE.
///
/// Entries with a null key come first in ascending order and last in
/// descending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFromIndexValuesStep {
    index: String,
    ascending: bool,
    #[serde(skip)]
    base: StepBase,
}

impl FetchFromIndexValuesStep {
    /// Scan index `index`.
    pub fn new(index: impl Into<String>, ascending: bool) -> Self {
        Self {
            index: index.into(),
            ascending,
            base: StepBase::default(),
        }
    }
}

impl ExecutionStep for FetchFromIndexValuesStep {
    step_common!("FetchFromIndexValuesStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        self.base.drain_prev(ctx)?;
        let index = open_index(ctx, &self.index)?;
        let entries: EntryIter<'a> = if self.ascending {
            Box::new(index.null_entries().chain(index.scan_all(true)?))
        } else {
            Box::new(index.scan_all(false)?.chain(index.null_entries()))
        };
        let mut seen = multi_entry(ctx, index).then(RidSet::new);
        let entries = entries.filter(move |entry| seen.as_mut().map_or(true, |s| s.insert(entry.rid)));
        Ok(ExecutionStream::from_iterator(entries.map(entry_row)).interruptible(ctx))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "FETCH ALL FROM INDEX {} {}",
            self.index,
            if self.ascending { "ASC" } else { "DESC" }
        )
    }
}

/// Load the record referenced by each entry row. Dangling entries are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetValueFromIndexEntryStep {
    #[serde(skip)]
    base: StepBase,
}

impl GetValueFromIndexEntryStep {
    /// Create the step.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStep for GetValueFromIndexEntryStep {
    step_common!("GetValueFromIndexEntryStep");

    fn internal_start<'a>(&'a mut self, ctx: &'a CommandContext) -> Result<ExecutionStream<'a>> {
        let upstream = self.base.start_prev(ctx, "GetValueFromIndexEntryStep")?;
        let db = ctx.db();
        Ok(upstream.flat_map(move |entry| {
            let record = match entry.get(RID_COLUMN) {
                Some(Value::Link(rid)) => db.load(*rid),
                _ => None,
            };
            Ok(match record {
                Some(record) => ExecutionStream::once(ResultRow::from_record(record)),
                None => ExecutionStream::empty(),
            })
        }))
    }

    fn can_be_cached(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "FETCH RECORDS FROM INDEX ENTRIES".to_string()
    }
}

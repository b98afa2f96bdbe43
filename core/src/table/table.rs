//! Table - coordinator for the tablets of one table.
//!
//! Routes each mutation to its tablet, allocates sequence numbers, and serves
//! point lookups and merged range reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::constants::TABLET_FETCH_SIZE;
use crate::error::{Error, Result};
use crate::partition::{PartitionConfig, Partitioner};
use crate::schema::{PartialRow, Row, Schema};
use crate::session::OperationKind;

use super::iterator::{FetchFailure, LiveEntriesIterator, MergeIterator, TabletCursor};
use super::snapshot::SnapshotRegistry;
use super::tablet::Tablet;
use super::types::{Key, SeqNum};

pub struct Table {
    name: String,
    schema: Arc<Schema>,
    partitioner: Partitioner,
    /// Indexed by `Partitioner::index_of`.
    tablets: Vec<Arc<Tablet>>,
    /// Next sequence number to hand out. Allocated under a tablet write lock.
    next_seq_num: AtomicU64,
    snapshots: Arc<SnapshotRegistry>,
    default_timeout: Option<Duration>,
}

impl Table {
    pub fn new(
        name: &str,
        schema: Schema,
        partition_config: &PartitionConfig,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        let partitioner = Partitioner::new(&schema, partition_config)?;
        let tablets = partitioner
            .partition_ids()
            .map(|id| {
                let (lower, upper) = partitioner.range_bounds(id.range_bucket);
                Arc::new(Tablet::new(id, lower, upper))
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            schema: Arc::new(schema),
            partitioner,
            tablets,
            next_seq_num: AtomicU64::new(1),
            snapshots: Arc::new(SnapshotRegistry::new()),
            default_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    pub fn tablets(&self) -> &[Arc<Tablet>] {
        &self.tablets
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// An empty row bound to this table's schema.
    pub fn new_row(&self) -> PartialRow {
        PartialRow::new(Arc::clone(&self.schema))
    }

    /// Sequence number of the most recent write; a consistent snapshot point.
    pub fn current_seq_num(&self) -> SeqNum {
        self.next_seq_num.load(Ordering::SeqCst) - 1
    }

    fn alloc_seq_num(&self) -> SeqNum {
        self.next_seq_num.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn snapshots(&self) -> &Arc<SnapshotRegistry> {
        &self.snapshots
    }

    pub(crate) fn deadline_after(&self, timeout: Option<Duration>) -> Option<Instant> {
        timeout.or(self.default_timeout).map(|t| Instant::now() + t)
    }

    fn tablet_for(&self, key: &Key) -> &Arc<Tablet> {
        let id = self.partitioner.partition_for_key(key);
        &self.tablets[self.partitioner.index_of(id)]
    }

    fn check_schema(&self, row: &PartialRow) -> Result<()> {
        if Arc::ptr_eq(row.schema(), &self.schema) || **row.schema() == *self.schema {
            return Ok(());
        }
        Err(Error::schema(format!("row does not match the schema of table '{}'", self.name)))
    }

    /// Insert a new row. Fails with `DuplicateKey` if the key is live.
    pub fn insert(&self, row: &PartialRow) -> Result<SeqNum> {
        self.apply(OperationKind::Insert, row, self.deadline_after(None))
    }

    /// Overwrite the set non-key columns of an existing row.
    pub fn update(&self, row: &PartialRow) -> Result<SeqNum> {
        self.apply(OperationKind::Update, row, self.deadline_after(None))
    }

    /// Insert, or replace the whole row if the key is live.
    pub fn upsert(&self, row: &PartialRow) -> Result<SeqNum> {
        self.apply(OperationKind::Upsert, row, self.deadline_after(None))
    }

    /// Delete the row identified by the key columns of `key`.
    pub fn delete(&self, key: &PartialRow) -> Result<SeqNum> {
        self.apply(OperationKind::Delete, key, self.deadline_after(None))
    }

    /// Apply one mutation atomically. Returns the sequence number assigned.
    ///
    /// Lock acquisition past `deadline` fails with `Timeout` before anything
    /// is written.
    pub fn apply(
        &self,
        kind: OperationKind,
        row: &PartialRow,
        deadline: Option<Instant>,
    ) -> Result<SeqNum> {
        self.check_schema(row)?;
        let key = row.encode_key()?;
        let tablet = self.tablet_for(&key);
        let mut memtable = tablet.write_until(deadline)?;
        let existing = memtable.get_live(&key, SeqNum::MAX);

        let new_row = match kind {
            OperationKind::Insert => {
                if existing.is_some() {
                    return Err(Error::DuplicateKey {
                        key: row.key_string(),
                    });
                }
                Some(row.to_row())
            }
            OperationKind::Update => {
                let existing = existing.ok_or_else(|| Error::NotFound {
                    key: row.key_string(),
                })?;
                Some(row.merge_into(&existing))
            }
            OperationKind::Upsert => Some(row.to_row()),
            OperationKind::Delete => {
                if existing.is_none() {
                    return Err(Error::NotFound {
                        key: row.key_string(),
                    });
                }
                None
            }
        };

        let seq_num = self.alloc_seq_num();
        match new_row {
            Some(new_row) => memtable.put(key, seq_num, Arc::new(new_row)),
            None => memtable.delete(key, seq_num),
        }
        trace!(table = %self.name, tablet = %tablet.id(), ?kind, seq_num, "applied mutation");
        Ok(seq_num)
    }

    /// Latest live row for the key columns of `key`.
    pub fn get(&self, key: &PartialRow) -> Result<Option<Arc<Row>>> {
        self.get_with_deadline(key, self.deadline_after(None))
    }

    pub fn get_with_deadline(
        &self,
        key: &PartialRow,
        deadline: Option<Instant>,
    ) -> Result<Option<Arc<Row>>> {
        self.check_schema(key)?;
        let key = key.encode_key()?;
        let memtable = self.tablet_for(&key).read_until(deadline)?;
        Ok(memtable.get_live(&key, SeqNum::MAX))
    }

    /// Live rows with `lower <= key < upper` in key order, newest versions.
    ///
    /// Bounds are key prefixes; None means unbounded. Call again with the
    /// same bounds to restart. Each tablet fetch waits at most the table's
    /// default timeout for the tablet lock.
    pub fn range_iterate(
        &self,
        lower: Option<&PartialRow>,
        upper: Option<&PartialRow>,
    ) -> Result<RowIter> {
        self.range_iterate_with_timeout(lower, upper, None)
    }

    /// `range_iterate` with a per-fetch lock timeout. None falls back to the
    /// table's default timeout.
    pub fn range_iterate_with_timeout(
        &self,
        lower: Option<&PartialRow>,
        upper: Option<&PartialRow>,
        timeout: Option<Duration>,
    ) -> Result<RowIter> {
        let lower = lower.map(|row| self.encode_bound(row)).transpose()?;
        let upper = upper.map(|row| self.encode_bound(row)).transpose()?;
        Ok(self.merged_range(
            lower,
            upper,
            SeqNum::MAX,
            TABLET_FETCH_SIZE,
            timeout.or(self.default_timeout),
        ))
    }

    pub(crate) fn encode_bound(&self, row: &PartialRow) -> Result<Key> {
        self.check_schema(row)?;
        row.encode_key_prefix()
    }

    /// K-way merge of every tablet that can hold keys in `[lower, upper)`.
    pub(crate) fn merged_range(
        &self,
        lower: Option<Key>,
        upper: Option<Key>,
        snapshot: SeqNum,
        fetch_size: usize,
        lock_timeout: Option<Duration>,
    ) -> RowIter {
        let failure = FetchFailure::default();
        let sources: Vec<TabletCursor> = self
            .tablets
            .iter()
            .filter(|tablet| tablet.overlaps(lower.as_ref(), upper.as_ref()))
            .map(|tablet| {
                TabletCursor::new(
                    Arc::clone(tablet),
                    lower.clone(),
                    upper.clone(),
                    snapshot,
                    fetch_size,
                )
                .with_lock_timeout(lock_timeout, failure.clone())
            })
            .collect();
        trace!(table = %self.name, tablets = sources.len(), snapshot, "range read");

        RowIter {
            inner: LiveEntriesIterator::new(MergeIterator::new(sources)),
            failure,
            failed: false,
        }
    }

    /// Drop row versions that neither the current state nor any pinned
    /// snapshot can observe. Returns the number of versions removed.
    pub fn compact_history(&self) -> usize {
        let watermark = self
            .snapshots
            .advance_watermark(|| self.current_seq_num());
        let removed: usize = self
            .tablets
            .iter()
            .map(|tablet| tablet.write().prune(watermark))
            .sum();
        debug!(table = %self.name, watermark, removed, "compacted row history");
        removed
    }

    pub fn stats(&self) -> TableStats {
        let mut stats = TableStats {
            tablet_count: self.tablets.len(),
            live_rows: 0,
            stored_versions: 0,
            last_seq_num: self.current_seq_num(),
            active_snapshots: self.snapshots.active_count(),
        };
        for tablet in &self.tablets {
            let memtable = tablet.read();
            stats.live_rows += memtable.live_count();
            stats.stored_versions += memtable.version_count();
        }
        stats
    }
}

/// Statistics about a table.
#[derive(Debug, Clone)]
pub struct TableStats {
    pub tablet_count: usize,
    pub live_rows: usize,
    pub stored_versions: usize,
    pub last_seq_num: SeqNum,
    pub active_snapshots: usize,
}

/// Live rows of a merged range read, in key order.
///
/// A tablet that cannot be read in time yields one `Err(Timeout)`, after
/// which the iterator ends.
pub struct RowIter {
    inner: LiveEntriesIterator<MergeIterator<TabletCursor>>,
    failure: FetchFailure,
    failed: bool,
}

impl Iterator for RowIter {
    type Item = Result<Arc<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let entry = self.inner.next();
        // A failed cursor drops out of the merge, so the entry popped
        // alongside its failure is not necessarily the next key in order.
        if let Some(err) = self.failure.take() {
            self.failed = true;
            return Some(Err(err));
        }
        entry.and_then(|entry| entry.row).map(Ok)
    }
}

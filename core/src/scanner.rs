//! Scanners: bounded, projected, filtered reads over a table.
//!
//! A scanner is configured through a `ScannerBuilder`, validated once at
//! `build()`, and then read batch by batch. Rows come back in primary key
//! order across every tablet that can hold keys in the requested range.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::constants::{DEFAULT_SCAN_BATCH_SIZE, TABLET_FETCH_SIZE};
use crate::error::{Error, Result};
use crate::schema::{PartialRow, Row, Schema, Value};
use crate::table::{Key, RowIter, SeqNum, SnapshotGuard, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
}

impl ComparisonOp {
    fn matches(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            ComparisonOp::Less => ordering == Less,
            ComparisonOp::LessEqual => ordering != Greater,
            ComparisonOp::Equal => ordering == Equal,
            ComparisonOp::GreaterEqual => ordering != Less,
            ComparisonOp::Greater => ordering == Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PredicateKind {
    Comparison(ComparisonOp, Value),
    InList(Vec<Value>),
    IsNull,
    IsNotNull,
}

/// A filter on one column. Null column values never satisfy a comparison
/// or an in-list.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    column: String,
    kind: PredicateKind,
}

impl Predicate {
    pub fn comparison(column: &str, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            kind: PredicateKind::Comparison(op, value.into()),
        }
    }

    pub fn in_list<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            column: column.to_string(),
            kind: PredicateKind::InList(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_null(column: &str) -> Self {
        Self {
            column: column.to_string(),
            kind: PredicateKind::IsNull,
        }
    }

    pub fn is_not_null(column: &str) -> Self {
        Self {
            column: column.to_string(),
            kind: PredicateKind::IsNotNull,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Resolve the column against `schema` and type-check the operands.
    fn bind(&self, schema: &Schema) -> Result<BoundPredicate> {
        let idx = schema
            .index_of(&self.column)
            .ok_or_else(|| Error::scan_config(format!("unknown predicate column '{}'", self.column)))?;
        let column_type = schema.column(idx).column_type;
        let check = |value: &Value| {
            if value.is_null() || !value.fits(column_type) {
                return Err(Error::scan_config(format!(
                    "predicate on '{}' expects a non-null {}, got {}",
                    self.column, column_type, value
                )));
            }
            Ok(())
        };
        match &self.kind {
            PredicateKind::Comparison(_, value) => check(value)?,
            PredicateKind::InList(values) => values.iter().try_for_each(check)?,
            PredicateKind::IsNull | PredicateKind::IsNotNull => {}
        }
        Ok(BoundPredicate {
            idx,
            kind: self.kind.clone(),
        })
    }
}

struct BoundPredicate {
    idx: usize,
    kind: PredicateKind,
}

impl BoundPredicate {
    fn matches(&self, row: &Row) -> bool {
        let value = row.value(self.idx);
        match &self.kind {
            PredicateKind::IsNull => value.is_null(),
            PredicateKind::IsNotNull => !value.is_null(),
            PredicateKind::Comparison(op, operand) => value
                .compare(operand)
                .is_some_and(|ordering| op.matches(ordering)),
            PredicateKind::InList(values) => values
                .iter()
                .any(|candidate| value.compare(candidate) == Some(std::cmp::Ordering::Equal)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Each batch sees the newest committed versions.
    #[default]
    Latest,
    /// Every batch sees the table as of one sequence number.
    Snapshot,
}

/// Configuration for a scanner. Cheap to clone, so a finished scan can be
/// restarted by building again.
#[derive(Clone)]
pub struct ScannerBuilder {
    table: Arc<Table>,
    lower: Option<PartialRow>,
    upper: Option<PartialRow>,
    projection: Option<Vec<String>>,
    predicates: Vec<Predicate>,
    read_mode: ReadMode,
    snapshot_at: Option<SeqNum>,
    batch_size: usize,
    limit: Option<usize>,
    timeout: Option<Duration>,
}

impl ScannerBuilder {
    pub fn new(table: &Arc<Table>) -> Self {
        Self {
            table: Arc::clone(table),
            lower: None,
            upper: None,
            projection: None,
            predicates: Vec::new(),
            read_mode: ReadMode::Latest,
            snapshot_at: None,
            batch_size: DEFAULT_SCAN_BATCH_SIZE,
            limit: None,
            timeout: None,
        }
    }

    /// Inclusive lower bound; only a prefix of the key columns may be set.
    pub fn lower_bound(mut self, row: PartialRow) -> Self {
        self.lower = Some(row);
        self
    }

    /// Exclusive upper bound; only a prefix of the key columns may be set.
    pub fn exclusive_upper_bound(mut self, row: PartialRow) -> Self {
        self.upper = Some(row);
        self
    }

    /// Columns to return, in this order. Defaults to every column.
    pub fn projected_columns<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.projection = Some(names.into_iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    pub fn add_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    /// Read as of an earlier sequence number. Implies `ReadMode::Snapshot`.
    pub fn snapshot_at(mut self, seq_num: SeqNum) -> Self {
        self.read_mode = ReadMode::Snapshot;
        self.snapshot_at = Some(seq_num);
        self
    }

    /// Maximum rows returned by one `next_batch` call.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows;
        self
    }

    /// Stop after this many rows in total.
    pub fn limit(mut self, rows: usize) -> Self {
        self.limit = Some(rows);
        self
    }

    /// Longest wait for a tablet lock on each fetch. Defaults to the
    /// table's default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(&self) -> Result<Scanner> {
        let table = &self.table;
        let schema = table.schema();

        if self.batch_size == 0 {
            return Err(Error::scan_config("batch size must be at least 1"));
        }

        let lower = self.lower.as_ref().map(|row| encode_bound(table, row)).transpose()?;
        let upper = self.upper.as_ref().map(|row| encode_bound(table, row)).transpose()?;
        if let (Some(lower), Some(upper)) = (&lower, &upper) {
            if lower > upper {
                return Err(Error::scan_config("lower bound is above the upper bound"));
            }
        }

        let projection: Vec<usize> = match &self.projection {
            None => (0..schema.column_count()).collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    schema.index_of(name).ok_or_else(|| {
                        Error::scan_config(format!("unknown projected column '{}'", name))
                    })
                })
                .collect::<Result<_>>()?,
        };
        let columns: Arc<[String]> = projection
            .iter()
            .map(|&idx| schema.column(idx).name.clone())
            .collect();

        let predicates = self
            .predicates
            .iter()
            .map(|p| p.bind(schema))
            .collect::<Result<Vec<_>>>()?;

        let snapshot = match (self.read_mode, self.snapshot_at) {
            (ReadMode::Latest, _) => None,
            (ReadMode::Snapshot, None) => {
                Some(table.snapshots().pin_current(|| table.current_seq_num()))
            }
            (ReadMode::Snapshot, Some(seq_num)) => {
                if seq_num > table.current_seq_num() {
                    return Err(Error::scan_config(format!(
                        "snapshot {} is in the future (current {})",
                        seq_num,
                        table.current_seq_num()
                    )));
                }
                Some(table.snapshots().pin_at(seq_num)?)
            }
        };
        let read_point = snapshot.as_ref().map_or(SeqNum::MAX, SnapshotGuard::seq_num);

        debug!(
            table = %table.name(),
            mode = ?self.read_mode,
            snapshot = snapshot.as_ref().map(SnapshotGuard::seq_num),
            predicates = predicates.len(),
            columns = columns.len(),
            "scanner built"
        );

        let lock_timeout = self.timeout.or(table.default_timeout());
        let rows = table.merged_range(lower, upper, read_point, TABLET_FETCH_SIZE, lock_timeout);
        Ok(Scanner {
            rows,
            peeked: None,
            predicates,
            projection,
            columns,
            batch_size: self.batch_size,
            remaining: self.limit,
            snapshot,
        })
    }
}

fn encode_bound(table: &Table, row: &PartialRow) -> Result<Key> {
    table.encode_bound(row).map_err(|err| match err {
        Error::Schema(msg) => Error::InvalidScanConfig(msg),
        other => other,
    })
}

impl fmt::Debug for ScannerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannerBuilder")
            .field("table", &self.table.name())
            .field("projection", &self.projection)
            .field("predicates", &self.predicates)
            .field("read_mode", &self.read_mode)
            .field("snapshot_at", &self.snapshot_at)
            .field("batch_size", &self.batch_size)
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A single-pass cursor over the rows matching a scanner configuration.
pub struct Scanner {
    rows: RowIter,
    peeked: Option<Result<Arc<Row>>>,
    predicates: Vec<BoundPredicate>,
    projection: Vec<usize>,
    columns: Arc<[String]>,
    batch_size: usize,
    /// Rows still allowed by the limit.
    remaining: Option<usize>,
    /// Keeps the read point's versions from being compacted away.
    snapshot: Option<SnapshotGuard>,
}

impl Scanner {
    /// The pinned read point, for snapshot scanners.
    pub fn snapshot_seq_num(&self) -> Option<SeqNum> {
        self.snapshot.as_ref().map(SnapshotGuard::seq_num)
    }

    pub fn projected_columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_more_rows(&mut self) -> bool {
        if self.remaining == Some(0) {
            return false;
        }
        if self.peeked.is_none() {
            self.peeked = self.next_match();
        }
        self.peeked.is_some()
    }

    /// Up to `batch_size` rows; empty once the scan is exhausted.
    ///
    /// A tablet that cannot be read in time fails with `Timeout`. Rows
    /// gathered before the failure are returned first and the error comes
    /// from the following call; the scan ends after it.
    pub fn next_batch(&mut self) -> Result<Vec<RowResult>> {
        let mut batch = Vec::new();
        while batch.len() < self.batch_size && self.has_more_rows() {
            match self.peeked.take() {
                Some(Ok(row)) => batch.push(self.take_row(&row)),
                Some(Err(err)) if batch.is_empty() => return Err(err),
                Some(Err(err)) => {
                    self.peeked = Some(Err(err));
                    break;
                }
                None => break,
            }
        }
        Ok(batch)
    }

    fn next_match(&mut self) -> Option<Result<Arc<Row>>> {
        let predicates = &self.predicates;
        self.rows.by_ref().find(|item| match item {
            Ok(row) => predicates.iter().all(|p| p.matches(row)),
            Err(_) => true,
        })
    }

    /// Count `row` against the limit and project it.
    fn take_row(&mut self, row: &Row) -> RowResult {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        self.project(row)
    }

    fn project(&self, row: &Row) -> RowResult {
        RowResult {
            columns: Arc::clone(&self.columns),
            values: self.projection.iter().map(|&idx| row.value(idx).clone()).collect(),
        }
    }
}

impl Iterator for Scanner {
    type Item = Result<RowResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_more_rows() {
            return None;
        }
        match self.peeked.take()? {
            Ok(row) => Some(Ok(self.take_row(&row))),
            Err(err) => Some(Err(err)),
        }
    }
}

/// One row as returned by a scanner: the projected columns only.
#[derive(Debug, Clone, PartialEq)]
pub struct RowResult {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl RowResult {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the `idx`-th projected column.
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| &self.values[idx])
    }
}

impl fmt::Display for RowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (name, value)) in self.columns.iter().zip(&self.values).enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        f.write_str("}")
    }
}

impl Table {
    pub fn new_scanner(self: &Arc<Self>) -> ScannerBuilder {
        ScannerBuilder::new(self)
    }
}

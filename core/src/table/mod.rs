//! Partitioned multi-version table store.
//!
//! Architecture:
//! - Tablet: one range/hash partition with its own lock
//! - MemTable: versioned, sorted rows of a tablet
//! - TabletCursor + MergeIterator: lazy k-way merged range reads
//! - SnapshotRegistry: pinned snapshot points and history compaction

mod iterator;
mod memtable;
mod snapshot;
mod tablet;
mod table;
mod types;

pub use iterator::{
    FetchFailure, LatestVersionIterator, LiveEntriesIterator, MergeIterator, TabletCursor,
};
pub use memtable::MemTable;
pub use snapshot::{SnapshotGuard, SnapshotRegistry};
pub use table::{RowIter, Table, TableStats};
pub use tablet::Tablet;
pub use types::{Entry, Key, SeqNum};

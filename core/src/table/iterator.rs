//! Iterators for range reads across tablets.
//!
//! A range read is a `TabletCursor` per qualifying tablet, merged by key with
//! `MergeIterator`, with tombstones removed by `LiveEntriesIterator`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::Error;

use super::tablet::Tablet;
use super::types::{Entry, Key, SeqNum};

/// Head entry of one merge source.
struct MergeHead {
    entry: Entry,
    source: usize,
}

impl PartialEq for MergeHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHead {}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead {
    // BinaryHeap is a max-heap; reversed so the smallest entry pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.entry.version_cmp(&self.entry)
    }
}

/// K-way merge of sources that each yield entries in read order.
///
/// At most one entry per source is held; a source is advanced only after
/// its head has been returned, so sources are pulled lazily.
pub struct MergeIterator<I> {
    sources: Vec<I>,
    heads: BinaryHeap<MergeHead>,
    primed: bool,
}

impl<I> MergeIterator<I>
where
    I: Iterator<Item = Entry>,
{
    pub fn new(sources: Vec<I>) -> Self {
        let heads = BinaryHeap::with_capacity(sources.len());
        Self {
            sources,
            heads,
            primed: false,
        }
    }

    fn pull(&mut self, source: usize) {
        if let Some(entry) = self.sources[source].next() {
            self.heads.push(MergeHead { entry, source });
        }
    }
}

impl<I> Iterator for MergeIterator<I>
where
    I: Iterator<Item = Entry>,
{
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                self.pull(source);
            }
        }

        let MergeHead { entry, source } = self.heads.pop()?;
        self.pull(source);
        Some(entry)
    }
}

/// Keeps only the first (newest) entry of each run of equal keys.
pub struct LatestVersionIterator<I> {
    inner: I,
    previous: Option<Key>,
}

impl<I> LatestVersionIterator<I>
where
    I: Iterator<Item = Entry>,
{
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            previous: None,
        }
    }
}

impl<I> Iterator for LatestVersionIterator<I>
where
    I: Iterator<Item = Entry>,
{
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let previous = &mut self.previous;
        let entry = self
            .inner
            .find(|entry| previous.as_ref() != Some(&entry.key))?;
        *previous = Some(entry.key.clone());
        Some(entry)
    }
}

/// Drops tombstones.
pub struct LiveEntriesIterator<I> {
    inner: I,
}

impl<I> LiveEntriesIterator<I>
where
    I: Iterator<Item = Entry>,
{
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I> Iterator for LiveEntriesIterator<I>
where
    I: Iterator<Item = Entry>,
{
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.find(|entry| !entry.is_tombstone())
    }
}

/// First error hit by any cursor of a range read.
///
/// Cursors are plain `Entry` iterators so they can feed `MergeIterator`; a
/// cursor that cannot fetch records the error here and ends, and the reader
/// on top of the merge reports it.
#[derive(Clone, Default)]
pub struct FetchFailure(Arc<Mutex<Option<Error>>>);

impl FetchFailure {
    fn record(&self, err: Error) {
        self.0.lock().get_or_insert(err);
    }

    pub fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// Lazy cursor over one tablet's key range at a fixed snapshot.
///
/// The tablet read lock is held only while a chunk is fetched; between
/// chunks the cursor remembers the last key it returned and resumes after it.
/// Each fetch waits at most `lock_timeout` for the lock.
pub struct TabletCursor {
    tablet: Arc<Tablet>,
    resume: Bound<Key>,
    upper: Option<Key>,
    snapshot: SeqNum,
    fetch_size: usize,
    lock_timeout: Option<Duration>,
    failure: FetchFailure,
    buffer: VecDeque<Entry>,
    exhausted: bool,
}

impl TabletCursor {
    pub fn new(
        tablet: Arc<Tablet>,
        lower: Option<Key>,
        upper: Option<Key>,
        snapshot: SeqNum,
        fetch_size: usize,
    ) -> Self {
        Self {
            tablet,
            resume: lower.map_or(Bound::Unbounded, Bound::Included),
            upper,
            snapshot,
            fetch_size: fetch_size.max(1),
            lock_timeout: None,
            failure: FetchFailure::default(),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Bound every fetch by `lock_timeout`; a fetch that times out records
    /// `Error::Timeout` in `failure` and ends the cursor.
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>, failure: FetchFailure) -> Self {
        self.lock_timeout = lock_timeout;
        self.failure = failure;
        self
    }

    fn fetch(&mut self) {
        let deadline = self.lock_timeout.map(|t| Instant::now() + t);
        let chunk = match self.tablet.read_until(deadline) {
            Ok(memtable) => memtable.scan(
                self.resume.as_ref(),
                self.upper.as_ref(),
                self.snapshot,
                self.fetch_size,
            ),
            Err(err) => {
                debug!(tablet = %self.tablet.id(), error = %err, "tablet fetch failed");
                self.exhausted = true;
                self.failure.record(err);
                return;
            }
        };
        trace!(tablet = %self.tablet.id(), rows = chunk.len(), "fetched tablet chunk");

        if chunk.len() < self.fetch_size {
            self.exhausted = true;
        }
        if let Some(last) = chunk.last() {
            self.resume = Bound::Excluded(last.key.clone());
        }
        self.buffer.extend(chunk);
    }
}

impl Iterator for TabletCursor {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch();
        }
        self.buffer.pop_front()
    }
}

//! Multi-version in-memory sorted table backing one tablet.
//!
//! Versions are stored sorted by (key, seq_num desc) in a BTreeMap, so a
//! snapshot read is a range lookup that skips versions newer than the
//! snapshot and takes the first one left.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::schema::Row;

use super::iterator::LatestVersionIterator;
use super::types::{Entry, Key, SeqNum};

/// In-memory multi-version table.
///
/// Entries are stored sorted by (key, reverse seq_num) so that:
/// - Keys are in ascending order
/// - For the same key, newer entries (higher seq_num) come first
#[derive(Default)]
pub struct MemTable {
    entries: BTreeMap<(Key, Reverse<SeqNum>), Option<Arc<Row>>>,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live version of `key`.
    pub fn put(&mut self, key: Key, seq_num: SeqNum, row: Arc<Row>) {
        self.entries.insert((key, Reverse(seq_num)), Some(row));
    }

    /// Record a tombstone for `key`.
    pub fn delete(&mut self, key: Key, seq_num: SeqNum) {
        self.entries.insert((key, Reverse(seq_num)), None);
    }

    /// Newest version of `key` visible at `snapshot`.
    /// Returns Some(Some(row)) if live, Some(None) if deleted (tombstone),
    /// or None if the key has no visible version.
    pub fn get(&self, key: &Key, snapshot: SeqNum) -> Option<Option<&Arc<Row>>> {
        let start = (key.clone(), Reverse(snapshot));
        let end = (key.clone(), Reverse(0));

        self.entries
            .range(start..=end)
            .next()
            .map(|(_, row)| row.as_ref())
    }

    /// Live row for `key` at `snapshot`, if any.
    pub fn get_live(&self, key: &Key, snapshot: SeqNum) -> Option<Arc<Row>> {
        self.get(key, snapshot).flatten().cloned()
    }

    /// Up to `limit` newest-visible versions (tombstones included) with keys
    /// in `[start, end)`, in key order.
    pub fn scan(
        &self,
        start: Bound<&Key>,
        end: Option<&Key>,
        snapshot: SeqNum,
        limit: usize,
    ) -> Vec<Entry> {
        let lower = match start {
            Bound::Included(key) => Bound::Included((key.clone(), Reverse(SeqNum::MAX))),
            // (key, Reverse(0)) sorts after every version of key.
            Bound::Excluded(key) => Bound::Excluded((key.clone(), Reverse(0))),
            Bound::Unbounded => Bound::Unbounded,
        };

        let visible = self
            .entries
            .range((lower, Bound::Unbounded))
            .filter(|((_, Reverse(seq)), _)| *seq <= snapshot)
            .map(|((key, Reverse(seq)), row)| Entry {
                key: key.clone(),
                seq_num: *seq,
                row: row.clone(),
            });

        LatestVersionIterator::new(visible)
            .take_while(|entry| end.is_none_or(|end| entry.key < *end))
            .take(limit)
            .collect()
    }

    /// Drop versions no reader at or after `watermark` can observe.
    ///
    /// For each key the newest version at or below the watermark is kept
    /// (unless it is a tombstone) along with everything newer.
    pub fn prune(&mut self, watermark: SeqNum) -> usize {
        let mut doomed = Vec::new();
        let mut current: Option<&Key> = None;
        let mut base_seen = false;

        for ((key, Reverse(seq)), row) in self.entries.iter() {
            if current != Some(key) {
                current = Some(key);
                base_seen = false;
            }
            if *seq > watermark {
                continue;
            }
            if base_seen || row.is_none() {
                doomed.push((key.clone(), Reverse(*seq)));
            }
            base_seen = true;
        }

        for version in &doomed {
            self.entries.remove(version);
        }
        doomed.len()
    }

    /// Number of stored versions, tombstones included.
    pub fn version_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of keys whose newest version is live.
    pub fn live_count(&self) -> usize {
        LatestVersionIterator::new(self.entries.iter().map(|((key, Reverse(seq)), row)| Entry {
            key: key.clone(),
            seq_num: *seq,
            row: row.clone(),
        }))
        .filter(|entry| !entry.is_tombstone())
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, PartialRow, Schema};

    fn row(id: &str, name: &str) -> Arc<Row> {
        let schema = Arc::new(
            Schema::builder()
                .add_key_column("id", ColumnType::String)
                .add_column("name", ColumnType::String)
                .build()
                .unwrap(),
        );
        let mut row = PartialRow::new(schema);
        row.set("id", id).unwrap().set("name", name).unwrap();
        Arc::new(row.to_row())
    }

    fn name_of(row: &Arc<Row>) -> &str {
        row.get("name").and_then(|v| v.as_str()).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let mut mem = MemTable::new();
        mem.put(Key::from("key1"), 1, row("key1", "value1"));
        mem.put(Key::from("key2"), 2, row("key2", "value2"));

        assert_eq!(name_of(&mem.get_live(&Key::from("key1"), SeqNum::MAX).unwrap()), "value1");
        assert_eq!(name_of(&mem.get_live(&Key::from("key2"), SeqNum::MAX).unwrap()), "value2");
        assert!(mem.get(&Key::from("key3"), SeqNum::MAX).is_none());
    }

    #[test]
    fn test_snapshot_sees_older_version() {
        let mut mem = MemTable::new();
        mem.put(Key::from("key"), 1, row("key", "v1"));
        mem.put(Key::from("key"), 5, row("key", "v2"));

        assert_eq!(name_of(&mem.get_live(&Key::from("key"), SeqNum::MAX).unwrap()), "v2");
        assert_eq!(name_of(&mem.get_live(&Key::from("key"), 4).unwrap()), "v1");
        assert!(mem.get(&Key::from("key"), 0).is_none());
    }

    #[test]
    fn test_delete() {
        let mut mem = MemTable::new();
        mem.put(Key::from("key"), 1, row("key", "value"));
        mem.delete(Key::from("key"), 2);

        // Get should return tombstone
        assert!(mem.get(&Key::from("key"), SeqNum::MAX).unwrap().is_none());
        assert!(mem.get_live(&Key::from("key"), 1).is_some());
        assert_eq!(mem.live_count(), 0);
    }

    #[test]
    fn test_scan_bounds_and_resume() {
        let mut mem = MemTable::new();
        for (seq, id) in ["a", "b", "c", "d"].iter().enumerate() {
            mem.put(Key::from(*id), seq as SeqNum + 1, row(id, id));
        }
        mem.delete(Key::from("b"), 10);

        let entries = mem.scan(Bound::Included(&Key::from("a")), Some(&Key::from("d")), SeqNum::MAX, 10);
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_bytes()).collect();
        assert_eq!(keys, vec![b"a", b"b", b"c"]);
        assert!(entries[1].is_tombstone());

        let resumed = mem.scan(Bound::Excluded(&Key::from("b")), None, SeqNum::MAX, 1);
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].key, Key::from("c"));
    }

    #[test]
    fn test_prune_keeps_visible_base() {
        let mut mem = MemTable::new();
        mem.put(Key::from("a"), 1, row("a", "v1"));
        mem.put(Key::from("a"), 2, row("a", "v2"));
        mem.put(Key::from("a"), 6, row("a", "v3"));
        mem.put(Key::from("b"), 3, row("b", "v1"));
        mem.delete(Key::from("b"), 4);

        // "a"@1 is shadowed by "a"@2; "b" is deleted below the watermark.
        let removed = mem.prune(5);
        assert_eq!(removed, 3);
        assert_eq!(mem.version_count(), 2);
        assert_eq!(name_of(&mem.get_live(&Key::from("a"), 5).unwrap()), "v2");
        assert_eq!(name_of(&mem.get_live(&Key::from("a"), SeqNum::MAX).unwrap()), "v3");
        assert!(mem.get(&Key::from("b"), SeqNum::MAX).is_none());
    }
}

//! A tablet is one partition of a table: a key range, a hash bucket, and a
//! memtable behind its own lock.

use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::partition::PartitionId;

use super::memtable::MemTable;
use super::types::Key;

pub struct Tablet {
    id: PartitionId,
    /// Inclusive lower bound of the range bucket, None when unbounded.
    lower: Option<Key>,
    /// Exclusive upper bound of the range bucket, None when unbounded.
    upper: Option<Key>,
    data: RwLock<MemTable>,
}

impl Tablet {
    pub fn new(id: PartitionId, lower: Option<Key>, upper: Option<Key>) -> Self {
        Self {
            id,
            lower,
            upper,
            data: RwLock::new(MemTable::new()),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn lower_bound(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper_bound(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Whether this tablet's range can hold keys in `[lower, upper)`.
    pub fn overlaps(&self, lower: Option<&Key>, upper: Option<&Key>) -> bool {
        let starts_before_end = match (lower, self.upper.as_ref()) {
            (Some(lower), Some(tablet_upper)) => lower < tablet_upper,
            _ => true,
        };
        let ends_after_start = match (upper, self.lower.as_ref()) {
            (Some(upper), Some(tablet_lower)) => tablet_lower < upper,
            _ => true,
        };
        starts_before_end && ends_after_start
    }

    /// Shared access for readers. Held only while a chunk is copied out.
    pub fn read(&self) -> RwLockReadGuard<'_, MemTable> {
        self.data.read()
    }

    /// Shared access bounded by `deadline`.
    pub fn read_until(&self, deadline: Option<Instant>) -> Result<RwLockReadGuard<'_, MemTable>> {
        match deadline {
            None => Ok(self.data.read()),
            Some(deadline) => {
                check_deadline(deadline)?;
                self.data.try_read_until(deadline).ok_or(Error::Timeout)
            }
        }
    }

    /// Exclusive access without a deadline.
    pub fn write(&self) -> RwLockWriteGuard<'_, MemTable> {
        self.data.write()
    }

    /// Exclusive access for one mutation, bounded by `deadline`.
    pub fn write_until(&self, deadline: Option<Instant>) -> Result<RwLockWriteGuard<'_, MemTable>> {
        match deadline {
            None => Ok(self.data.write()),
            Some(deadline) => {
                check_deadline(deadline)?;
                self.data.try_write_until(deadline).ok_or(Error::Timeout)
            }
        }
    }
}

fn check_deadline(deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(Error::Timeout);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_overlaps() {
        let tablet = Tablet::new(PartitionId::new(1, 0), Some(Key::from("c")), Some(Key::from("f")));

        assert!(tablet.overlaps(None, None));
        assert!(tablet.overlaps(Some(&Key::from("a")), Some(&Key::from("d"))));
        assert!(tablet.overlaps(Some(&Key::from("e")), None));
        // Scan upper bound is exclusive; tablet lower bound is inclusive.
        assert!(!tablet.overlaps(Some(&Key::from("a")), Some(&Key::from("c"))));
        // Tablet upper bound is exclusive.
        assert!(!tablet.overlaps(Some(&Key::from("f")), None));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let tablet = Tablet::new(PartitionId::new(0, 0), None, None);
        let past = Instant::now() - Duration::from_millis(1);
        assert!(matches!(tablet.write_until(Some(past)), Err(Error::Timeout)));
        assert!(matches!(tablet.read_until(Some(past)), Err(Error::Timeout)));
    }

    #[test]
    fn test_write_times_out_while_locked() {
        let tablet = Tablet::new(PartitionId::new(0, 0), None, None);
        let _held = tablet.write();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(tablet.write_until(Some(deadline)), Err(Error::Timeout)));
    }
}

//! Keys, sequence numbers and row versions.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::schema::Row;

/// Table-wide sequence number. Higher sequence numbers are newer; 0 means
/// nothing has been written yet.
pub type SeqNum = u64;

/// Encoded primary key. Byte order equals typed key order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// One version of a row as seen by a reader: the row written at `seq_num`,
/// or None when that write was a delete.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub seq_num: SeqNum,
    pub row: Option<Arc<Row>>,
}

impl Entry {
    pub fn live(key: Key, seq_num: SeqNum, row: Arc<Row>) -> Self {
        Self {
            key,
            seq_num,
            row: Some(row),
        }
    }

    pub fn tombstone(key: Key, seq_num: SeqNum) -> Self {
        Self {
            key,
            seq_num,
            row: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.row.is_none()
    }

    /// Read order: key ascending, then newest version first.
    pub fn version_cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.seq_num.cmp(&self.seq_num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_order() {
        let a1 = Entry::tombstone(Key::from("a"), 1);
        let a2 = Entry::tombstone(Key::from("a"), 2);
        let b1 = Entry::tombstone(Key::from("b"), 1);

        assert_eq!(a2.version_cmp(&a1), Ordering::Less);
        assert_eq!(a1.version_cmp(&b1), Ordering::Less);
        assert_eq!(a1.version_cmp(&a1.clone()), Ordering::Equal);
    }

    #[test]
    fn test_key_ordering_is_bytewise() {
        assert!(Key::from("10") < Key::from("3"));
        assert!(Key::from("a") < Key::from("ab"));
        assert!(Key::from(&b"\x00\xff"[..]) < Key::from(&b"\x01"[..]));
        assert_eq!(format!("{:?}", Key::from(&b"\x00\xab"[..])), "Key(00ab)");
    }
}

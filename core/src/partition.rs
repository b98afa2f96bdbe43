//! Routing of rows to partitions.
//!
//! A table is split by range first, then by hash: `range_split_points`
//! divides the key space into `len + 1` ordered range buckets, and every range
//! bucket is split again into `num_hash_buckets` buckets by a CRC32 of the
//! encoded primary key. Both steps depend only on the key bytes and the
//! configuration, so routing is identical across processes and restarts.

use std::fmt;

use crate::error::{Error, Result};
use crate::schema::keycodec::encode_key_prefix;
use crate::schema::{PartialRow, Schema, Value};
use crate::table::Key;

/// How a table is divided into partitions.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Key prefixes (values for the leading key columns), strictly increasing.
    pub range_split_points: Vec<Vec<Value>>,
    pub num_hash_buckets: u32,
    /// Recorded for a future replication layer; has no effect on a single node.
    pub num_replicas: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            range_split_points: Vec::new(),
            num_hash_buckets: 1,
            num_replicas: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId {
    pub range_bucket: usize,
    pub hash_bucket: u32,
}

impl PartitionId {
    pub fn new(range_bucket: usize, hash_bucket: u32) -> Self {
        Self {
            range_bucket,
            hash_bucket,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}-h{}", self.range_bucket, self.hash_bucket)
    }
}

#[derive(Debug, Clone)]
pub struct Partitioner {
    split_keys: Vec<Key>,
    num_hash_buckets: u32,
    num_replicas: u32,
}

impl Partitioner {
    pub fn new(schema: &Schema, config: &PartitionConfig) -> Result<Self> {
        if config.num_hash_buckets == 0 {
            return Err(Error::Config("num_hash_buckets must be at least 1".into()));
        }
        if config.num_replicas == 0 {
            return Err(Error::Config("num_replicas must be at least 1".into()));
        }

        let mut split_keys: Vec<Key> = Vec::with_capacity(config.range_split_points.len());
        for point in &config.range_split_points {
            if point.is_empty() {
                return Err(Error::Config("range split point must not be empty".into()));
            }
            let values: Vec<&Value> = point.iter().collect();
            let key = encode_key_prefix(schema, &values)
                .map_err(|e| Error::Config(format!("invalid range split point: {}", e)))?;
            if let Some(prev) = split_keys.last() {
                if *prev >= key {
                    return Err(Error::Config(
                        "range split points must be strictly increasing".into(),
                    ));
                }
            }
            split_keys.push(key);
        }

        Ok(Self {
            split_keys,
            num_hash_buckets: config.num_hash_buckets,
            num_replicas: config.num_replicas,
        })
    }

    /// Partition that owns `row`. All key columns must be set.
    pub fn partition_for(&self, row: &PartialRow) -> Result<PartitionId> {
        Ok(self.partition_for_key(&row.encode_key()?))
    }

    pub fn partition_for_key(&self, key: &Key) -> PartitionId {
        PartitionId {
            range_bucket: self.range_bucket(key),
            hash_bucket: self.hash_bucket(key),
        }
    }

    fn range_bucket(&self, key: &Key) -> usize {
        self.split_keys.partition_point(|split| split <= key)
    }

    fn hash_bucket(&self, key: &Key) -> u32 {
        crc32fast::hash(key.as_bytes()) % self.num_hash_buckets
    }

    pub fn num_range_buckets(&self) -> usize {
        self.split_keys.len() + 1
    }

    pub fn num_hash_buckets(&self) -> u32 {
        self.num_hash_buckets
    }

    pub fn num_replicas(&self) -> u32 {
        self.num_replicas
    }

    pub fn num_partitions(&self) -> usize {
        self.num_range_buckets() * self.num_hash_buckets as usize
    }

    /// `[lower, upper)` of a range bucket; None means unbounded.
    pub fn range_bounds(&self, range_bucket: usize) -> (Option<Key>, Option<Key>) {
        let lower = range_bucket
            .checked_sub(1)
            .and_then(|idx| self.split_keys.get(idx))
            .cloned();
        let upper = self.split_keys.get(range_bucket).cloned();
        (lower, upper)
    }

    /// Dense index of a partition, range-major.
    pub fn index_of(&self, id: PartitionId) -> usize {
        id.range_bucket * self.num_hash_buckets as usize + id.hash_bucket as usize
    }

    /// Every partition id in index order.
    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        (0..self.num_range_buckets()).flat_map(move |range_bucket| {
            (0..self.num_hash_buckets).map(move |hash_bucket| PartitionId::new(range_bucket, hash_bucket))
        })
    }
}

/// Partition of `row` under `config`, without keeping a partitioner around.
pub fn partition_for(row: &PartialRow, schema: &Schema, config: &PartitionConfig) -> Result<PartitionId> {
    Partitioner::new(schema, config)?.partition_for(row)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::schema::ColumnType;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .add_key_column("id", ColumnType::Int32)
                .add_column("name", ColumnType::String)
                .build()
                .unwrap(),
        )
    }

    fn row(schema: &Arc<Schema>, id: i32) -> PartialRow {
        let mut row = PartialRow::new(Arc::clone(schema));
        row.set("id", id).unwrap();
        row
    }

    fn config() -> PartitionConfig {
        PartitionConfig {
            range_split_points: vec![vec![Value::from(100)], vec![Value::from(200)]],
            num_hash_buckets: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_range_buckets() {
        let schema = schema();
        let partitioner = Partitioner::new(&schema, &config()).unwrap();

        assert_eq!(partitioner.num_partitions(), 12);
        assert_eq!(partitioner.partition_for(&row(&schema, -5)).unwrap().range_bucket, 0);
        assert_eq!(partitioner.partition_for(&row(&schema, 99)).unwrap().range_bucket, 0);
        assert_eq!(partitioner.partition_for(&row(&schema, 100)).unwrap().range_bucket, 1);
        assert_eq!(partitioner.partition_for(&row(&schema, 199)).unwrap().range_bucket, 1);
        assert_eq!(partitioner.partition_for(&row(&schema, 200)).unwrap().range_bucket, 2);
    }

    #[test]
    fn test_partition_is_stable() {
        let schema = schema();
        let first = Partitioner::new(&schema, &config()).unwrap();
        let second = Partitioner::new(&schema, &config()).unwrap();

        for id in 0..500 {
            let row = row(&schema, id);
            let a = first.partition_for(&row).unwrap();
            assert_eq!(a, first.partition_for(&row).unwrap());
            assert_eq!(a, second.partition_for(&row).unwrap());
            assert_eq!(a, partition_for(&row, &schema, &config()).unwrap());
            assert!(a.hash_bucket < 4);
        }
    }

    #[test]
    fn test_hash_is_crc32_of_encoded_key() {
        let schema = schema();
        let partitioner = Partitioner::new(&schema, &config()).unwrap();
        let row = row(&schema, 42);
        let key = row.encode_key().unwrap();
        let expected = crc32fast::hash(key.as_bytes()) % 4;
        assert_eq!(partitioner.partition_for(&row).unwrap().hash_bucket, expected);
    }

    #[test]
    fn test_range_bounds() {
        let schema = schema();
        let partitioner = Partitioner::new(&schema, &config()).unwrap();
        let (lower, upper) = partitioner.range_bounds(0);
        assert!(lower.is_none());
        assert!(upper.is_some());
        let (lower, upper) = partitioner.range_bounds(2);
        assert!(lower.is_some());
        assert!(upper.is_none());
        assert_eq!(partitioner.partition_ids().count(), 12);
    }

    #[test]
    fn test_invalid_configs() {
        let schema = schema();
        let zero_buckets = PartitionConfig {
            num_hash_buckets: 0,
            ..Default::default()
        };
        assert!(matches!(Partitioner::new(&schema, &zero_buckets), Err(Error::Config(_))));

        let zero_replicas = PartitionConfig {
            num_replicas: 0,
            ..Default::default()
        };
        assert!(matches!(Partitioner::new(&schema, &zero_replicas), Err(Error::Config(_))));

        let unsorted = PartitionConfig {
            range_split_points: vec![vec![Value::from(5)], vec![Value::from(5)]],
            ..Default::default()
        };
        assert!(matches!(Partitioner::new(&schema, &unsorted), Err(Error::Config(_))));

        let wrong_type = PartitionConfig {
            range_split_points: vec![vec![Value::from("x")]],
            ..Default::default()
        };
        assert!(matches!(Partitioner::new(&schema, &wrong_type), Err(Error::Config(_))));
    }
}

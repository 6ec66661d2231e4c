//! Record partitioning and scan planning.
//!
//! Every record is assigned a partition key in `[0, partition_count)` when it
//! is written. Ranged scans are split into contiguous key ranges so they can be
//! read in parallel.
//!
//! # Hash
//!
//! The partition key is the first eight bytes of the BLAKE3 digest of the
//! record id (little-endian, unsigned) modulo the partition count. The value
//! is platform independent and never negative. Changing the partition count
//! after data is written invalidates existing assignments.

use crate::Paging;
use serde::{Deserialize, Serialize};

/// Partition count used when none is configured.
pub const DEFAULT_PARTITION_COUNT: u32 = 100;

/// Compute the partition key of a record id.
pub fn partition_key(record_id: &str, partition_count: u32) -> u32 {
    debug_assert!(partition_count > 0, "partition count must be positive");
    let digest = blake3::hash(record_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    let hash = u64::from_le_bytes(prefix);
    (hash % u64::from(partition_count.max(1))) as u32
}

/// A half-open range of partition keys: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardRange {
    pub start: u32,
    pub end: u32,
}

impl ShardRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of partition keys covered.
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: u32) -> bool {
        key >= self.start && key < self.end
    }
}

/// Split `[0, partition_count)` into `min(hint, partition_count)` contiguous,
/// non-empty ranges whose sizes differ by at most one.
///
/// A hint of zero is treated as one. Larger ranges come first.
pub fn plan_partitions(partition_count: u32, parallelism_hint: u32) -> Vec<ShardRange> {
    if partition_count == 0 {
        return Vec::new();
    }
    let parts = parallelism_hint.clamp(1, partition_count);
    let base = partition_count / parts;
    let remainder = partition_count % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for i in 0..parts {
        let size = if i < remainder { base + 1 } else { base };
        ranges.push(ShardRange::new(start, start + size));
        start += size;
    }
    ranges
}

/// Plan a ranged scan.
///
/// A paged scan is collapsed to a single range: independently ordered shards
/// cannot produce a globally consistent page.
pub fn plan_scan(partition_count: u32, parallelism_hint: u32, paging: &Paging) -> Vec<ShardRange> {
    let hint = if parallelism_hint > 1 && paging.is_paged() {
        1
    } else {
        parallelism_hint
    };
    plan_partitions(partition_count, hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_is_stable() {
        let a = partition_key("record-1", 100);
        let b = partition_key("record-1", 100);
        assert_eq!(a, b);
        assert!(a < 100);
    }

    #[test]
    fn test_partition_key_single_partition() {
        for id in ["", "a", "zzz", "ünïcødé"] {
            assert_eq!(partition_key(id, 1), 0);
        }
    }

    #[test]
    fn test_plan_even_split() {
        let ranges = plan_partitions(100, 4);
        assert_eq!(
            ranges,
            vec![
                ShardRange::new(0, 25),
                ShardRange::new(25, 50),
                ShardRange::new(50, 75),
                ShardRange::new(75, 100),
            ]
        );
    }

    #[test]
    fn test_plan_uneven_split() {
        let ranges = plan_partitions(10, 3);
        assert_eq!(
            ranges,
            vec![ShardRange::new(0, 4), ShardRange::new(4, 7), ShardRange::new(7, 10)]
        );
    }

    #[test]
    fn test_plan_hint_larger_than_partitions() {
        let ranges = plan_partitions(3, 10);
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.len() == 1));
    }

    #[test]
    fn test_plan_zero_hint() {
        assert_eq!(plan_partitions(8, 0), vec![ShardRange::new(0, 8)]);
    }

    #[test]
    fn test_plan_scan_collapses_paged() {
        let paged = Paging::new(5, None);
        assert_eq!(plan_scan(100, 4, &paged), vec![ShardRange::new(0, 100)]);

        let limited = Paging::new(0, Some(20));
        assert_eq!(plan_scan(100, 4, &limited).len(), 1);

        assert_eq!(plan_scan(100, 4, &Paging::unbounded()).len(), 4);
    }
}

//! Partitioning of a work list into contiguous batches.

use serde::Serialize;
use std::ops::Range;

/// Divisor used to size chunks when running sequentially.
pub const SEQUENTIAL_CHUNK_DIVISOR: usize = 3;

/// How a list of `len` items is cut into batches.
///
/// With `concurrency <= 1` chunks are `max(1, len / divisor)` items long.
/// Otherwise `num_batches = min(len, concurrency * 2)` and chunks are
/// `max(1, len / num_batches)` items long. Either way the last chunk holds
/// the remainder, so the chunk count can exceed `num_batches`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub concurrency: usize,
    pub batch_size: usize,
    pub ranges: Vec<Range<usize>>,
}

impl BatchPlan {
    pub fn new(len: usize, concurrency: usize, sequential_divisor: usize) -> Self {
        let concurrency = concurrency.max(1);
        if len == 0 {
            return Self {
                concurrency,
                batch_size: 0,
                ranges: Vec::new(),
            };
        }

        let batch_size = if concurrency == 1 {
            (len / sequential_divisor.max(1)).max(1)
        } else {
            let num_batches = len.min(concurrency * 2);
            (len / num_batches).max(1)
        };

        let ranges = (0..len)
            .step_by(batch_size)
            .map(|start| start..(start + batch_size).min(len))
            .collect();

        Self {
            concurrency,
            batch_size,
            ranges,
        }
    }

    pub fn is_sequential(&self) -> bool {
        self.concurrency == 1
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Copy `items` into one owned vector per batch.
    pub fn split<T: Clone>(&self, items: &[T]) -> Vec<Vec<T>> {
        self.ranges.iter().map(|r| items[r.clone()].to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(plan: &BatchPlan) -> Vec<usize> {
        plan.ranges.iter().map(|r| r.len()).collect()
    }

    #[test]
    fn test_seven_items_three_workers() {
        let plan = BatchPlan::new(7, 3, SEQUENTIAL_CHUNK_DIVISOR);
        assert_eq!(plan.batch_size, 1);
        assert_eq!(plan.len(), 7);
        assert!(!plan.is_sequential());
    }

    #[test]
    fn test_concurrent_remainder_chunk() {
        // num_batches = min(10, 4) = 4, batch_size = 2
        let plan = BatchPlan::new(10, 2, SEQUENTIAL_CHUNK_DIVISOR);
        assert_eq!(sizes(&plan), vec![2, 2, 2, 2, 2]);
        // num_batches = 4, batch_size = 2, remainder of 1
        let plan = BatchPlan::new(9, 2, SEQUENTIAL_CHUNK_DIVISOR);
        assert_eq!(sizes(&plan), vec![2, 2, 2, 2, 1]);
    }

    #[test]
    fn test_sequential_chunks_by_divisor() {
        let plan = BatchPlan::new(10, 1, SEQUENTIAL_CHUNK_DIVISOR);
        assert!(plan.is_sequential());
        assert_eq!(sizes(&plan), vec![3, 3, 3, 1]);
        let plan = BatchPlan::new(2, 0, SEQUENTIAL_CHUNK_DIVISOR);
        assert_eq!(plan.concurrency, 1);
        assert_eq!(sizes(&plan), vec![1, 1]);
    }

    #[test]
    fn test_partition_is_exhaustive_and_disjoint() {
        for len in 0..40 {
            for concurrency in 0..6 {
                let plan = BatchPlan::new(len, concurrency, SEQUENTIAL_CHUNK_DIVISOR);
                let mut next = 0;
                for range in &plan.ranges {
                    assert_eq!(range.start, next, "gap or overlap at len={len} c={concurrency}");
                    assert!(!range.is_empty());
                    next = range.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn test_split_preserves_order() {
        let items: Vec<u32> = (0..5).collect();
        let plan = BatchPlan::new(items.len(), 2, SEQUENTIAL_CHUNK_DIVISOR);
        let batches = plan.split(&items);
        assert_eq!(batches.concat(), items);
    }

    #[test]
    fn test_empty_plan() {
        let plan = BatchPlan::new(0, 4, SEQUENTIAL_CHUNK_DIVISOR);
        assert!(plan.is_empty());
        assert!(plan.split::<u8>(&[]).is_empty());
    }
}

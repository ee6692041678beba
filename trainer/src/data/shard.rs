use std::ops::Range;

/// Splits `total` samples among `world_size` processes and returns the shard of `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1, some may be empty when `total < world_size`.
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    assert!(world_size > 0);
    assert!(rank < world_size);

    let base = total / world_size;
    let rem = total % world_size;

    let start = rank * base + rank.min(rem);
    let extra = if rank < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// The portion of a dataset owned by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub rank: usize,
    pub world_size: usize,
}

impl ShardSpec {
    pub fn new(rank: usize, world_size: usize) -> Self {
        assert!(rank < world_size, "rank out of range");
        Self { rank, world_size }
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.world_size)
    }
}

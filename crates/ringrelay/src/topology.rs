use crate::error::{Error, Result};
use crate::Rank;

/// Fixed successor/predecessor relation over a group of `size` participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingTopology {
    size: usize,
}

impl RingTopology {
    /// Creates the ring for a group of `size` participants.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidGroupSize(size));
        }
        Ok(Self { size })
    }

    /// Number of participants in the ring.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// `(rank + 1) mod N`
    #[inline]
    pub fn successor(&self, rank: Rank) -> Rank {
        debug_assert!(rank < self.size, "rank {} outside ring of {}", rank, self.size);
        (rank + 1) % self.size
    }

    /// `(rank - 1 + N) mod N`
    #[inline]
    pub fn predecessor(&self, rank: Rank) -> Rank {
        debug_assert!(rank < self.size, "rank {} outside ring of {}", rank, self.size);
        (rank + self.size - 1) % self.size
    }

    /// `(predecessor, successor)` of `rank`.
    #[inline]
    pub fn neighbors(&self, rank: Rank) -> (Rank, Rank) {
        (self.predecessor(rank), self.successor(rank))
    }
}

//! Padded sequence cells.
//!
//! A sequence cell occupies one cache line of the header; the 8-byte
//! value sits at byte 24 of its line. Each cell has exactly one writer:
//! the producer writes cell 0, consumer `i` writes cell `i + 1`. All
//! cross-process synchronization happens through these cells: a
//! release-store when publishing, an acquire-load when observing.

use crate::layout::{CACHE_LINE, SEQ_VALUE_OFFSET};
use basalt_mmap::SharedRegion;

/// One header cell holding a published sequence number.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SequenceCell {
    offset: usize,
}

impl SequenceCell {
    /// Cell `0` is the producer's; cells `1..` belong to consumers.
    pub(crate) fn at(cell_index: usize) -> Self {
        Self {
            offset: cell_index * CACHE_LINE + SEQ_VALUE_OFFSET,
        }
    }

    /// Acquire-load of the published value.
    #[inline(always)]
    pub(crate) fn get(&self, region: &SharedRegion) -> i64 {
        region.get_long_volatile(self.offset)
    }

    /// Release-store of a new value. Everything written before this call
    /// is visible to a peer that observes the stored value.
    #[inline(always)]
    pub(crate) fn set(&self, region: &SharedRegion, value: i64) {
        region.put_long_volatile(self.offset, value);
    }
}

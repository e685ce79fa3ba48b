//! Ring layout constants, slot-index arithmetic, and header inspection.
//!
//! Every ring variant shares the same header cell shape: one 64-byte
//! cache line per sequence number, with the 8-byte value placed at byte
//! 24 of its line so the hot word sits mid-line and never shares a line
//! with its neighbour.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ cell 0: 24 B pad │ offer sequence (i64) │ 32 B pad          │
//! ├────────────────────────────────────────────────────────────┤
//! │ cell 1..: one per consumer (blocking / broadcast only)      │
//! ├────────────────────────────────────────────────────────────┤
//! │ capacity (i32), max message size (i32)  (blocking SPSC)     │
//! ├────────────────────────────────────────────────────────────┤
//! │ data slots: capacity × slot_size                            │
//! └────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{RingError, RingResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A typical CPU cache line.
pub(crate) const CACHE_LINE: usize = 64;

/// Offset of the 8-byte sequence value inside its cell.
pub(crate) const SEQ_VALUE_OFFSET: usize = 24;

/// Default number of slots when a caller does not care.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Blocking SPSC header: producer cell, consumer cell, then the two
/// persisted i32s (capacity, max message size).
pub(crate) const BLOCKING_HEADER_SIZE: usize = 2 * CACHE_LINE + 8;

/// Offset of the persisted (capacity, max message size) pair.
pub(crate) const PERSISTED_FIELDS_OFFSET: usize = 2 * CACHE_LINE;

/// Non-blocking SPSC header: producer cell only.
pub(crate) const NONBLOCKING_HEADER_SIZE: usize = CACHE_LINE;

/// Broadcast header: one producer cell plus one cell per consumer.
#[inline]
pub(crate) fn broadcast_header_size(consumers: usize) -> usize {
    CACHE_LINE * (consumers + 1)
}

#[inline]
pub(crate) fn is_power_of_two(n: usize) -> bool {
    n > 0 && n & (n - 1) == 0
}

/// Maps logical sequence numbers to slot indices.
///
/// Sequence `S ≥ 1` lands in slot `(S − 1) mod capacity`; the power-of-two
/// path replaces the division with a mask.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotIndexer {
    capacity: usize,
    mask: i64,
    power_of_two: bool,
}

impl SlotIndexer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            mask: capacity as i64 - 1,
            power_of_two: is_power_of_two(capacity),
        }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub(crate) fn index(&self, seq: i64) -> usize {
        debug_assert!(seq >= 1, "sequences start at 1, got {seq}");
        if self.power_of_two {
            ((seq - 1) & self.mask) as usize
        } else {
            ((seq - 1) % self.capacity as i64) as usize
        }
    }
}

/// Capacity and max message size must be positive and representable in
/// the persisted i32 header fields.
pub(crate) fn validate_ring_parameters(capacity: usize, max_message_size: usize) -> RingResult<()> {
    if capacity == 0 || capacity > i32::MAX as usize {
        return Err(RingError::invalid(format!(
            "capacity out of range: {capacity}"
        )));
    }
    if max_message_size == 0 || max_message_size > i32::MAX as usize {
        return Err(RingError::invalid(format!(
            "max message size out of range: {max_message_size}"
        )));
    }
    Ok(())
}

/// Total file size for a ring with the given header.
#[inline]
pub(crate) fn required_file_size(header_size: usize, capacity: usize, slot_size: usize) -> u64 {
    header_size as u64 + capacity as u64 * slot_size as u64
}

/// Checks an existing file's length against what the ring parameters imply.
pub(crate) fn validate_file_length(path: &Path, expected: u64) -> RingResult<()> {
    let actual = std::fs::metadata(path)?.len();
    if actual != expected {
        return Err(RingError::mismatch(
            "file length",
            actual as i64,
            expected as i64,
        ));
    }
    Ok(())
}

/// Reads the persisted (capacity, max message size) pair of a blocking
/// SPSC ring with ordinary file I/O, before any mapping happens.
///
/// Returns `None` if the file does not exist. A file too short to hold
/// the header is a configuration mismatch.
pub(crate) fn read_persisted_fields(path: &Path) -> RingResult<Option<(i32, i32)>> {
    if !path.is_file() {
        return Ok(None);
    }
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < BLOCKING_HEADER_SIZE as u64 {
        return Err(RingError::mismatch(
            "file length",
            len as i64,
            BLOCKING_HEADER_SIZE as i64,
        ));
    }
    file.seek(SeekFrom::Start(PERSISTED_FIELDS_OFFSET as u64))?;
    let mut raw = [0u8; 8];
    file.read_exact(&mut raw)?;
    let capacity = i32::from_le_bytes(raw[0..4].try_into().unwrap());
    let max_message_size = i32::from_le_bytes(raw[4..8].try_into().unwrap());
    Ok(Some((capacity, max_message_size)))
}

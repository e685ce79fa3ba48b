//! Non-blocking single-producer / single-consumer ring.
//!
//! The producer never waits and never fails: when the consumer lags by
//! more than the ring capacity the producer simply laps it and
//! overwrites unread slots. The consumer detects that it has been
//! overtaken by comparing its own position against the producer's
//! published sequence: `available_to_fetch` returns `-1` and the
//! consumer is expected to tear down its session.
//!
//! Because there is no consumer cell, nothing the consumer does is ever
//! visible to the producer. Two safety controls close the window where
//! the producer wraps while the consumer is mid-read:
//!
//! - a fall-behind tolerance below 1.0 shrinks the lag the consumer
//!   accepts, leaving headroom between "still readable" and
//!   "about to be overwritten";
//! - an optional per-slot checksum gives end-to-end verification, at
//!   the cost of 8 bytes per slot and a hash on both sides.

use crate::api::{RingConsumer, RingProducer};
use crate::checksum::{CHECKSUM_SIZE, slot_checksum};
use crate::error::{RingError, RingResult};
use crate::layout::{
    NONBLOCKING_HEADER_SIZE, SlotIndexer, required_file_size, validate_file_length,
    validate_ring_parameters,
};
use crate::pool::MessagePool;
use crate::seq::SequenceCell;
use basalt_mmap::{MemorySerializable, SharedRegion};
use std::path::Path;
use tracing::debug;

const POOL_PREBUILD: usize = 64;

#[inline]
fn slot_size(max_message_size: usize, checksum: bool) -> usize {
    if checksum {
        max_message_size + CHECKSUM_SIZE
    } else {
        max_message_size
    }
}

/// Producer side of the non-blocking ring.
///
/// `next_to_dispatch` always succeeds; back-pressure does not exist in
/// this variant.
pub struct NonBlockingRingProducer<M: MemorySerializable> {
    region: SharedRegion,
    indexer: SlotIndexer,
    slot_size: usize,
    write_checksum: bool,
    last_offered: i64,
    offer_sequence: SequenceCell,
    pool: MessagePool<M>,
}

impl<M: MemorySerializable + Default + 'static> NonBlockingRingProducer<M> {
    pub fn create(
        capacity: usize,
        max_message_size: usize,
        checksum: bool,
        path: impl AsRef<Path>,
    ) -> RingResult<Self> {
        Self::create_with(capacity, max_message_size, checksum, path, Box::new(M::default))
    }
}

impl<M: MemorySerializable> NonBlockingRingProducer<M> {
    pub fn create_with(
        capacity: usize,
        max_message_size: usize,
        checksum: bool,
        path: impl AsRef<Path>,
        builder: Box<dyn Fn() -> M + Send>,
    ) -> RingResult<Self> {
        let path = path.as_ref();
        validate_ring_parameters(capacity, max_message_size)?;

        let slot_size = slot_size(max_message_size, checksum);
        let required = required_file_size(NONBLOCKING_HEADER_SIZE, capacity, slot_size);
        if path.is_file() {
            validate_file_length(path, required)?;
        }
        let region = SharedRegion::open(path, required)?;

        let offer_sequence = SequenceCell::at(0);
        let last_offered = offer_sequence.get(&region);

        debug!(
            path = %path.display(),
            capacity,
            max_message_size,
            checksum,
            last_offered,
            "non-blocking ring producer attached"
        );

        Ok(Self {
            region,
            indexer: SlotIndexer::new(capacity),
            slot_size,
            write_checksum: checksum,
            last_offered,
            offer_sequence,
            pool: MessagePool::new(POOL_PREBUILD, builder),
        })
    }
}

impl<M: MemorySerializable> RingProducer<M> for NonBlockingRingProducer<M> {
    fn next_to_dispatch(&mut self) -> Option<&mut M> {
        self.last_offered += 1;
        Some(self.pool.claim())
    }

    fn flush(&mut self) {
        let mut seq = self.last_offered - self.pool.in_flight() as i64 + 1;
        for message in self.pool.pending() {
            let slot = NONBLOCKING_HEADER_SIZE + self.indexer.index(seq) * self.slot_size;
            if self.write_checksum {
                let written = message.write_to(&self.region, slot + CHECKSUM_SIZE);
                let sum = slot_checksum(seq, self.region.bytes(slot + CHECKSUM_SIZE, written));
                self.region.put_long(slot, sum as i64);
            } else {
                message.write_to(&self.region, slot);
            }
            seq += 1;
        }
        self.pool.clear();
        self.offer_sequence.set(&self.region, self.last_offered);
    }

    fn last_offered_sequence(&self) -> i64 {
        self.last_offered
    }

    fn capacity(&self) -> usize {
        self.indexer.capacity()
    }

    fn close(self, delete_file: bool) -> RingResult<()> {
        debug!(path = %self.region.path().display(), "non-blocking ring producer closed");
        self.region.release(delete_file)?;
        Ok(())
    }
}

impl<M: MemorySerializable> std::fmt::Debug for NonBlockingRingConsumer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingRingConsumer").finish()
    }
}

/// Consumer side of the non-blocking ring.
pub struct NonBlockingRingConsumer<M: MemorySerializable> {
    region: SharedRegion,
    indexer: SlotIndexer,
    slot_size: usize,
    payload_offset: usize,
    verify_checksum: bool,
    effective_fall_behind: i64,
    last_fetched: i64,
    fetch_count: i64,
    offer_sequence: SequenceCell,
    data: M,
}

impl<M: MemorySerializable + Default> NonBlockingRingConsumer<M> {
    pub fn open(
        capacity: Option<usize>,
        max_message_size: usize,
        checksum: bool,
        fall_behind_tolerance: f64,
        path: impl AsRef<Path>,
    ) -> RingResult<Self> {
        Self::open_with(
            capacity,
            max_message_size,
            checksum,
            fall_behind_tolerance,
            path,
            M::default(),
        )
    }
}

impl<M: MemorySerializable> NonBlockingRingConsumer<M> {
    /// Opens the ring at `path`. `None` capacity is inferred from the
    /// file length, which requires the file to exist.
    ///
    /// `fall_behind_tolerance` must be in `(0, 1]`; it is ignored when
    /// checksums are on, where the full capacity is usable because every
    /// fetch is verified end-to-end.
    pub fn open_with(
        capacity: Option<usize>,
        max_message_size: usize,
        checksum: bool,
        fall_behind_tolerance: f64,
        path: impl AsRef<Path>,
        message: M,
    ) -> RingResult<Self> {
        let path = path.as_ref();
        if !(fall_behind_tolerance > 0.0 && fall_behind_tolerance <= 1.0) {
            return Err(RingError::invalid(format!(
                "fall-behind tolerance must be in (0, 1], got {fall_behind_tolerance}"
            )));
        }

        let slot_size = slot_size(max_message_size, checksum);
        let capacity = match capacity {
            Some(c) => c,
            None => infer_capacity(path, slot_size)?,
        };
        validate_ring_parameters(capacity, max_message_size)?;

        let required = required_file_size(NONBLOCKING_HEADER_SIZE, capacity, slot_size);
        if path.is_file() {
            validate_file_length(path, required)?;
        }
        let region = SharedRegion::open(path, required)?;

        let effective_fall_behind = if checksum {
            capacity as i64
        } else {
            ((capacity as f64 * fall_behind_tolerance).round() as i64).max(1)
        };

        debug!(
            path = %path.display(),
            capacity,
            max_message_size,
            checksum,
            effective_fall_behind,
            "non-blocking ring consumer attached"
        );

        Ok(Self {
            region,
            indexer: SlotIndexer::new(capacity),
            slot_size,
            payload_offset: if checksum { CHECKSUM_SIZE } else { 0 },
            verify_checksum: checksum,
            effective_fall_behind,
            last_fetched: 0,
            fetch_count: 0,
            offer_sequence: SequenceCell::at(0),
            data: message,
        })
    }

    /// Lag this consumer accepts before reporting itself overtaken.
    pub fn effective_fall_behind_capacity(&self) -> i64 {
        self.effective_fall_behind
    }

    fn decode_next(&mut self, advance: bool) -> Option<&M> {
        let seq = self.last_fetched + 1;
        let slot = NONBLOCKING_HEADER_SIZE + self.indexer.index(seq) * self.slot_size;
        let payload = slot + self.payload_offset;
        if self.verify_checksum {
            let stored = self.region.get_long(slot) as u64;
            let read = self.data.read_from(&self.region, payload);
            let computed = slot_checksum(seq, self.region.bytes(payload, read));
            if stored != computed {
                // Raced an overwriting producer. Counters stay put so a
                // retry sees the slot once it is coherent again.
                return None;
            }
        } else {
            self.data.read_from(&self.region, payload);
        }
        if advance {
            self.last_fetched = seq;
            self.fetch_count += 1;
        }
        Some(&self.data)
    }
}

impl<M: MemorySerializable> RingConsumer<M> for NonBlockingRingConsumer<M> {
    /// Returns `-1` when the producer has published more than this
    /// consumer's accepted lag, meaning the wrap has (or may have) destroyed
    /// unread messages.
    fn available_to_fetch(&self) -> i64 {
        let available = self.offer_sequence.get(&self.region) - self.last_fetched;
        if available > self.effective_fall_behind {
            return -1;
        }
        available
    }

    fn fetch(&mut self) -> Option<&M> {
        self.decode_next(true)
    }

    fn peek(&mut self) -> Option<&M> {
        self.decode_next(false)
    }

    fn roll_back(&mut self, count: i64) -> RingResult<()> {
        if count < 0 || count > self.fetch_count {
            return Err(RingError::invalid(format!(
                "rollback of {count} with only {} in-flight fetches",
                self.fetch_count
            )));
        }
        self.last_fetched -= count;
        self.fetch_count -= count;
        Ok(())
    }

    fn roll_back_all(&mut self) {
        self.last_fetched -= self.fetch_count;
        self.fetch_count = 0;
    }

    /// There is no consumer cell to publish; only the in-flight fetch
    /// count resets.
    fn done_fetching(&mut self) {
        self.fetch_count = 0;
    }

    fn last_fetched_sequence(&self) -> i64 {
        self.last_fetched
    }

    fn capacity(&self) -> usize {
        self.indexer.capacity()
    }

    fn close(self, delete_file: bool) -> RingResult<()> {
        debug!(path = %self.region.path().display(), "non-blocking ring consumer closed");
        self.region.release(delete_file)?;
        Ok(())
    }
}

fn infer_capacity(path: &Path, slot_size: usize) -> RingResult<usize> {
    if !path.is_file() {
        return Err(RingError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let file_length = std::fs::metadata(path)?.len();
    let data_length = file_length.saturating_sub(NONBLOCKING_HEADER_SIZE as u64);
    Ok((data_length / slot_size as u64) as usize)
}

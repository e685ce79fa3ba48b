//! The capability every ring variant exposes.
//!
//! Concrete producer/consumer types are picked at construction time and
//! used directly; the traits exist so code that drives a ring (tests,
//! benches, harnesses) can be written once against the common surface.
//! Nothing on the hot path is dispatched dynamically.

use crate::error::RingResult;
use basalt_mmap::MemorySerializable;

/// The producing side of a ring.
///
/// A dispatch cycle is `next_to_dispatch` one or more times, filling
/// each returned instance in place, then a single `flush` that
/// serializes the batch and publishes it with one release-store.
pub trait RingProducer<M: MemorySerializable> {
    /// Claims the next message to fill, or `None` when the ring is full
    /// (blocking variants only; the caller picks its wait strategy,
    /// typically a busy spin). The non-blocking variant never returns
    /// `None`.
    fn next_to_dispatch(&mut self) -> Option<&mut M>;

    /// Serializes every claimed message into its slot, returns the
    /// instances to the pool, and publishes the new offer sequence.
    fn flush(&mut self);

    /// Highest sequence this producer has claimed (published or pending).
    fn last_offered_sequence(&self) -> i64;

    /// Number of slots in the ring.
    fn capacity(&self) -> usize;

    /// Releases the shared region, optionally deleting the backing file.
    fn close(self, delete_file: bool) -> RingResult<()>
    where
        Self: Sized;
}

/// The consuming side of a ring.
///
/// A fetch cycle is `available_to_fetch`, then that many `fetch` calls,
/// then `done_fetching` to acknowledge (no-op acknowledgement on the
/// non-blocking variant, which has no consumer cell). `roll_back`
/// un-reads messages fetched since the last acknowledgement.
pub trait RingConsumer<M: MemorySerializable> {
    /// How many messages are ready, by acquire-loading the producer's
    /// sequence. The non-blocking variant returns `-1` when the producer
    /// has wrapped past this consumer.
    fn available_to_fetch(&self) -> i64;

    /// Decodes the next message and advances. Returns `None` only in
    /// checksum mode, when the stored checksum does not match: the
    /// consumer's counters are left untouched so a later retry can see
    /// the slot once it is coherent again.
    fn fetch(&mut self) -> Option<&M>;

    /// Decodes the next message without advancing.
    fn peek(&mut self) -> Option<&M>;

    /// Unwinds `count` fetches performed since the last `done_fetching`.
    fn roll_back(&mut self, count: i64) -> RingResult<()>;

    /// Unwinds every fetch performed since the last `done_fetching`.
    fn roll_back_all(&mut self);

    /// Acknowledges everything fetched so far, letting the producer
    /// reclaim those slots.
    fn done_fetching(&mut self);

    /// Highest sequence this consumer has fetched.
    fn last_fetched_sequence(&self) -> i64;

    /// Number of slots in the ring.
    fn capacity(&self) -> usize;

    /// Releases the shared region, optionally deleting the backing file.
    fn close(self, delete_file: bool) -> RingResult<()>
    where
        Self: Sized;
}

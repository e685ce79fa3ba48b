//! Blocking single-producer / single-consumer ring.
//!
//! The producer is bounded by the consumer: it may not claim a sequence
//! more than `capacity` ahead of the consumer's acknowledged sequence,
//! so no message is ever overwritten before it has been read. A full
//! ring surfaces as `None` from `next_to_dispatch`; an empty ring as
//! `0` from `available_to_fetch`. Neither side blocks inside the
//! library; the caller chooses its wait strategy, and a busy spin is
//! the lowest-latency choice.
//!
//! The header persists `(capacity, max_message_size)` after the two
//! sequence cells, so either side may open the ring with `None` for
//! both and discover them from the file, and a participant supplying
//! explicit values is validated against what the file says.

use crate::api::{RingConsumer, RingProducer};
use crate::error::{RingError, RingResult};
use crate::layout::{
    BLOCKING_HEADER_SIZE, PERSISTED_FIELDS_OFFSET, SlotIndexer, read_persisted_fields,
    required_file_size, validate_file_length, validate_ring_parameters,
};
use crate::pool::MessagePool;
use crate::seq::SequenceCell;
use basalt_mmap::{MemorySerializable, SharedRegion};
use std::path::Path;
use tracing::debug;

/// Instances built up front for the producer's pool.
const POOL_PREBUILD: usize = 64;

/// Resolves `(capacity, max_message_size)` against the file at `path`,
/// validates lengths, maps the region, and persists the pair when the
/// file is new.
fn open_blocking_region(
    capacity: Option<usize>,
    max_message_size: Option<usize>,
    path: &Path,
) -> RingResult<(SharedRegion, usize, usize)> {
    let persisted = read_persisted_fields(path)?;

    let (capacity, max_message_size) = match persisted {
        Some((file_capacity, file_max)) => {
            if file_capacity <= 0 || file_max <= 0 {
                return Err(RingError::invalid(format!(
                    "ring file holds invalid parameters: capacity={file_capacity} max_message_size={file_max}"
                )));
            }
            let capacity = match capacity {
                Some(c) if c as i64 != file_capacity as i64 => {
                    return Err(RingError::mismatch(
                        "capacity",
                        c as i64,
                        file_capacity as i64,
                    ));
                }
                Some(c) => c,
                None => file_capacity as usize,
            };
            let max_message_size = match max_message_size {
                Some(m) if m as i64 != file_max as i64 => {
                    return Err(RingError::mismatch(
                        "max message size",
                        m as i64,
                        file_max as i64,
                    ));
                }
                Some(m) => m,
                None => file_max as usize,
            };
            (capacity, max_message_size)
        }
        None => match (capacity, max_message_size) {
            (Some(c), Some(m)) => (c, m),
            _ => {
                return Err(RingError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
        },
    };

    validate_ring_parameters(capacity, max_message_size)?;

    let required = required_file_size(BLOCKING_HEADER_SIZE, capacity, max_message_size);
    if persisted.is_some() {
        validate_file_length(path, required)?;
    }

    let region = SharedRegion::open(path, required)?;
    if persisted.is_none() {
        region.put_int(PERSISTED_FIELDS_OFFSET, capacity as i32);
        region.put_int(PERSISTED_FIELDS_OFFSET + 4, max_message_size as i32);
    }

    Ok((region, capacity, max_message_size))
}

impl<M: MemorySerializable> std::fmt::Debug for BlockingRingProducer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingRingProducer").finish()
    }
}

/// Producer side of the blocking SPSC ring.
pub struct BlockingRingProducer<M: MemorySerializable> {
    region: SharedRegion,
    indexer: SlotIndexer,
    max_message_size: usize,
    last_offered: i64,
    max_seq_before_wrapping: i64,
    offer_sequence: SequenceCell,
    fetch_sequence: SequenceCell,
    pool: MessagePool<M>,
}

impl<M: MemorySerializable + Default + 'static> BlockingRingProducer<M> {
    /// Opens the ring at `path`, pooling messages built with `Default`.
    ///
    /// `None` for capacity or max message size reads the value persisted
    /// in the file (the file must exist in that case).
    pub fn create(
        capacity: Option<usize>,
        max_message_size: Option<usize>,
        path: impl AsRef<Path>,
    ) -> RingResult<Self> {
        Self::create_with(capacity, max_message_size, path, Box::new(M::default))
    }
}

impl<M: MemorySerializable> BlockingRingProducer<M> {
    /// Opens the ring at `path` with an explicit message builder, for
    /// message types whose construction needs parameters.
    pub fn create_with(
        capacity: Option<usize>,
        max_message_size: Option<usize>,
        path: impl AsRef<Path>,
        builder: Box<dyn Fn() -> M + Send>,
    ) -> RingResult<Self> {
        let path = path.as_ref();
        let (region, capacity, max_message_size) =
            open_blocking_region(capacity, max_message_size, path)?;

        let offer_sequence = SequenceCell::at(0);
        let fetch_sequence = SequenceCell::at(1);
        // Resume where a previous producer left off; zero on a fresh file.
        let last_offered = offer_sequence.get(&region);
        let max_seq_before_wrapping = fetch_sequence.get(&region) + capacity as i64;

        debug!(
            path = %path.display(),
            capacity,
            max_message_size,
            last_offered,
            "blocking ring producer attached"
        );

        Ok(Self {
            region,
            indexer: SlotIndexer::new(capacity),
            max_message_size,
            last_offered,
            max_seq_before_wrapping,
            offer_sequence,
            fetch_sequence,
            pool: MessagePool::new(POOL_PREBUILD, builder),
        })
    }
}

impl<M: MemorySerializable> RingProducer<M> for BlockingRingProducer<M> {
    fn next_to_dispatch(&mut self) -> Option<&mut M> {
        self.last_offered += 1;
        if self.last_offered > self.max_seq_before_wrapping {
            // Would overwrite an unread slot: re-read the consumer's
            // sequence before giving up.
            self.max_seq_before_wrapping =
                self.fetch_sequence.get(&self.region) + self.indexer.capacity() as i64;
            if self.last_offered > self.max_seq_before_wrapping {
                self.last_offered -= 1;
                return None;
            }
        }
        Some(self.pool.claim())
    }

    fn flush(&mut self) {
        let mut seq = self.last_offered - self.pool.in_flight() as i64 + 1;
        for message in self.pool.pending() {
            let offset = BLOCKING_HEADER_SIZE + self.indexer.index(seq) * self.max_message_size;
            message.write_to(&self.region, offset);
            seq += 1;
        }
        self.pool.clear();
        // Single release-store makes the whole batch visible.
        self.offer_sequence.set(&self.region, self.last_offered);
    }

    fn last_offered_sequence(&self) -> i64 {
        self.last_offered
    }

    fn capacity(&self) -> usize {
        self.indexer.capacity()
    }

    fn close(self, delete_file: bool) -> RingResult<()> {
        debug!(path = %self.region.path().display(), "blocking ring producer closed");
        self.region.release(delete_file)?;
        Ok(())
    }
}

impl<M: MemorySerializable> std::fmt::Debug for BlockingRingConsumer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingRingConsumer").finish()
    }
}

/// Consumer side of the blocking SPSC ring.
pub struct BlockingRingConsumer<M: MemorySerializable> {
    region: SharedRegion,
    indexer: SlotIndexer,
    max_message_size: usize,
    last_fetched: i64,
    fetch_count: i64,
    offer_sequence: SequenceCell,
    fetch_sequence: SequenceCell,
    data: M,
}

impl<M: MemorySerializable + Default> BlockingRingConsumer<M> {
    /// Opens the ring at `path`, decoding into a `Default`-built instance.
    ///
    /// `None` for capacity or max message size reads the value persisted
    /// in the file (the file must exist in that case).
    pub fn open(
        capacity: Option<usize>,
        max_message_size: Option<usize>,
        path: impl AsRef<Path>,
    ) -> RingResult<Self> {
        Self::open_with(capacity, max_message_size, path, M::default())
    }
}

impl<M: MemorySerializable> BlockingRingConsumer<M> {
    /// Opens the ring at `path` decoding into the supplied instance.
    pub fn open_with(
        capacity: Option<usize>,
        max_message_size: Option<usize>,
        path: impl AsRef<Path>,
        message: M,
    ) -> RingResult<Self> {
        let path = path.as_ref();
        let (region, capacity, max_message_size) =
            open_blocking_region(capacity, max_message_size, path)?;

        let offer_sequence = SequenceCell::at(0);
        let fetch_sequence = SequenceCell::at(1);
        let last_fetched = fetch_sequence.get(&region);

        debug!(
            path = %path.display(),
            capacity,
            max_message_size,
            last_fetched,
            "blocking ring consumer attached"
        );

        Ok(Self {
            region,
            indexer: SlotIndexer::new(capacity),
            max_message_size,
            last_fetched,
            fetch_count: 0,
            offer_sequence,
            fetch_sequence,
            data: message,
        })
    }

    #[inline]
    fn slot_offset(&self, seq: i64) -> usize {
        BLOCKING_HEADER_SIZE + self.indexer.index(seq) * self.max_message_size
    }
}

impl<M: MemorySerializable> RingConsumer<M> for BlockingRingConsumer<M> {
    fn available_to_fetch(&self) -> i64 {
        self.offer_sequence.get(&self.region) - self.last_fetched
    }

    fn fetch(&mut self) -> Option<&M> {
        let seq = self.last_fetched + 1;
        let offset = self.slot_offset(seq);
        self.data.read_from(&self.region, offset);
        self.last_fetched = seq;
        self.fetch_count += 1;
        Some(&self.data)
    }

    fn peek(&mut self) -> Option<&M> {
        let offset = self.slot_offset(self.last_fetched + 1);
        self.data.read_from(&self.region, offset);
        Some(&self.data)
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

    fn done_fetching(&mut self) {
        self.fetch_sequence.set(&self.region, self.last_fetched);
        self.fetch_count = 0;
    }

    fn last_fetched_sequence(&self) -> i64 {
        self.last_fetched
    }

    fn capacity(&self) -> usize {
        self.indexer.capacity()
    }

    fn close(self, delete_file: bool) -> RingResult<()> {
        debug!(path = %self.region.path().display(), "blocking ring consumer closed");
        self.region.release(delete_file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_messages::TopOfBook;
    use std::path::PathBuf;

    fn ring_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("basalt_blocking_{label}_{}", std::process::id()))
    }

    fn send(producer: &mut BlockingRingProducer<TopOfBook>, id: u64) -> bool {
        match producer.next_to_dispatch() {
            Some(m) => {
                m.ts_event_ns = id;
                true
            }
            None => false,
        }
    }

    #[test]
    fn round_trip_preserves_order_within_a_batch() {
        let path = ring_path("roundtrip");
        let mut producer =
            BlockingRingProducer::<TopOfBook>::create(Some(16), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();
        let mut consumer =
            BlockingRingConsumer::<TopOfBook>::open(Some(16), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        for id in 1..=5 {
            assert!(send(&mut producer, id));
        }
        producer.flush();

        assert_eq!(consumer.available_to_fetch(), 5);
        for id in 1..=5 {
            let m = consumer.fetch().unwrap();
            assert_eq!(m.ts_event_ns, id);
        }
        consumer.done_fetching();
        assert_eq!(consumer.available_to_fetch(), 0);

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }

    #[test]
    fn full_ring_returns_none_until_acknowledged() {
        let path = ring_path("full");
        let mut producer =
            BlockingRingProducer::<TopOfBook>::create(Some(8), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();
        let mut consumer =
            BlockingRingConsumer::<TopOfBook>::open(Some(8), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        // Exactly capacity in-flight claims must succeed.
        for id in 1..=8 {
            assert!(send(&mut producer, id), "claim {id} should fit");
        }
        producer.flush();

        // The 9th claim exceeds the unacknowledged window.
        assert!(producer.next_to_dispatch().is_none());
        assert_eq!(producer.last_offered_sequence(), 8);

        // Fetching without acknowledging does not free capacity.
        for _ in 0..8 {
            consumer.fetch().unwrap();
        }
        assert!(producer.next_to_dispatch().is_none());

        // Acknowledgement reopens the window.
        consumer.done_fetching();
        assert!(send(&mut producer, 9));
        producer.flush();

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }

    #[test]
    fn non_power_of_two_capacity_works() {
        let path = ring_path("mod_cap");
        let mut producer =
            BlockingRingProducer::<TopOfBook>::create(Some(10), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();
        let mut consumer =
            BlockingRingConsumer::<TopOfBook>::open(Some(10), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        // Three laps around a capacity that has no mask.
        for id in 1..=30u64 {
            assert!(send(&mut producer, id));
            producer.flush();
            assert_eq!(consumer.fetch().unwrap().ts_event_ns, id);
            consumer.done_fetching();
        }

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }

    #[test]
    fn rollback_then_refetch_yields_same_messages() {
        let path = ring_path("rollback");
        let mut producer =
            BlockingRingProducer::<TopOfBook>::create(Some(16), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();
        let mut consumer =
            BlockingRingConsumer::<TopOfBook>::open(Some(16), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        for id in 1..=4 {
            assert!(send(&mut producer, id));
        }
        producer.flush();

        let mut first_pass = Vec::new();
        for _ in 0..4 {
            first_pass.push(consumer.fetch().unwrap().ts_event_ns);
        }

        consumer.roll_back(2).unwrap();
        assert_eq!(consumer.last_fetched_sequence(), 2);
        let mut second_pass = Vec::new();
        for _ in 0..2 {
            second_pass.push(consumer.fetch().unwrap().ts_event_ns);
        }
        assert_eq!(&first_pass[2..], &second_pass[..]);

        // More than the in-flight count is an error, as is a negative count.
        assert!(consumer.roll_back(5).is_err());
        assert!(consumer.roll_back(-1).is_err());

        consumer.roll_back_all();
        assert_eq!(consumer.last_fetched_sequence(), 0);

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }

    #[test]
    fn peek_does_not_advance() {
        let path = ring_path("peek");
        let mut producer =
            BlockingRingProducer::<TopOfBook>::create(Some(8), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();
        let mut consumer =
            BlockingRingConsumer::<TopOfBook>::open(Some(8), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        assert!(send(&mut producer, 77));
        producer.flush();

        assert_eq!(consumer.peek().unwrap().ts_event_ns, 77);
        assert_eq!(consumer.peek().unwrap().ts_event_ns, 77);
        assert_eq!(consumer.last_fetched_sequence(), 0);
        assert_eq!(consumer.fetch().unwrap().ts_event_ns, 77);
        assert_eq!(consumer.last_fetched_sequence(), 1);

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }

    #[test]
    fn done_fetching_with_nothing_fetched_is_a_noop() {
        let path = ring_path("noop_ack");
        let producer =
            BlockingRingProducer::<TopOfBook>::create(Some(8), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();
        let mut consumer =
            BlockingRingConsumer::<TopOfBook>::open(Some(8), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        consumer.done_fetching();
        assert_eq!(consumer.last_fetched_sequence(), 0);
        assert_eq!(consumer.available_to_fetch(), 0);

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }

    #[test]
    fn parameters_are_discovered_from_the_file() {
        let path = ring_path("discovery");
        let producer =
            BlockingRingProducer::<TopOfBook>::create(Some(32), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        let consumer = BlockingRingConsumer::<TopOfBook>::open(None, None, &path).unwrap();
        assert_eq!(consumer.capacity(), 32);

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }

    #[test]
    fn discovery_without_a_file_fails() {
        let path = ring_path("no_file");
        let err = BlockingRingConsumer::<TopOfBook>::open(None, None, &path).unwrap_err();
        assert!(matches!(err, RingError::FileNotFound { .. }));
    }

    #[test]
    fn mismatched_parameters_are_rejected() {
        let path = ring_path("mismatch");
        let producer =
            BlockingRingProducer::<TopOfBook>::create(Some(32), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();

        let err =
            BlockingRingConsumer::<TopOfBook>::open(Some(64), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap_err();
        assert!(matches!(
            err,
            RingError::ConfigurationMismatch { field: "capacity", .. }
        ));

        let err = BlockingRingConsumer::<TopOfBook>::open(Some(32), Some(4096), &path).unwrap_err();
        assert!(matches!(
            err,
            RingError::ConfigurationMismatch { field: "max message size", .. }
        ));

        producer.close(true).unwrap();
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let path = ring_path("zero_cap");
        let err =
            BlockingRingProducer::<TopOfBook>::create(Some(0), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap_err();
        assert!(matches!(err, RingError::InvalidArgument { .. }));
    }

    #[test]
    fn producer_resumes_from_the_header_after_restart() {
        let path = ring_path("resume");
        let mut producer =
            BlockingRingProducer::<TopOfBook>::create(Some(16), Some(TopOfBook::MAX_SIZE), &path)
                .unwrap();
        for id in 1..=3 {
            assert!(send(&mut producer, id));
        }
        producer.flush();
        producer.close(false).unwrap();

        // A restarted producer picks up at sequence 3.
        let mut producer =
            BlockingRingProducer::<TopOfBook>::create(None, None, &path).unwrap();
        assert_eq!(producer.last_offered_sequence(), 3);
        assert!(send(&mut producer, 4));
        producer.flush();

        let mut consumer = BlockingRingConsumer::<TopOfBook>::open(None, None, &path).unwrap();
        assert_eq!(consumer.available_to_fetch(), 4);
        for id in 1..=4 {
            assert_eq!(consumer.fetch().unwrap().ts_event_ns, id);
        }

        producer.close(false).unwrap();
        consumer.close(true).unwrap();
    }
}

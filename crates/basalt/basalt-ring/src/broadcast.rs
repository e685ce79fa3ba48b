//! Blocking single-producer / multi-consumer broadcast ring.
//!
//! Every consumer sees every message, in publication order. The header
//! holds one cell per consumer after the producer's cell, and the
//! producer is bounded by the *slowest* active consumer: it may not
//! claim a sequence more than `capacity` ahead of the minimum
//! acknowledged sequence. Consumers are otherwise independent: a slow
//! consumer stalls the producer but never affects its peers' ordering.
//!
//! A consumer that has died or stopped fetching would stall the
//! producer forever; `disable_consumer` is the escape hatch. It stores
//! `i64::MAX` in that consumer's cell, which removes it from the
//! producer's minimum.

use crate::api::{RingConsumer, RingProducer};
use crate::error::{RingError, RingResult};
use crate::layout::{
    CACHE_LINE, SlotIndexer, broadcast_header_size, required_file_size, validate_file_length,
    validate_ring_parameters,
};
use crate::pool::MessagePool;
use crate::seq::SequenceCell;
use basalt_mmap::{MemorySerializable, SharedRegion};
use std::path::Path;
use tracing::debug;

const POOL_PREBUILD: usize = 64;

/// Cell value that removes a consumer from the producer's minimum.
const DISABLED_SENTINEL: i64 = i64::MAX;

/// Producer side of the broadcast ring.
pub struct BroadcastRingProducer<M: MemorySerializable> {
    region: SharedRegion,
    indexer: SlotIndexer,
    max_message_size: usize,
    header_size: usize,
    last_offered: i64,
    max_seq_before_wrapping: i64,
    offer_sequence: SequenceCell,
    fetch_sequences: Vec<SequenceCell>,
    pool: MessagePool<M>,
}

impl<M: MemorySerializable + Default + 'static> BroadcastRingProducer<M> {
    pub fn create(
        capacity: usize,
        max_message_size: usize,
        path: impl AsRef<Path>,
        consumers: usize,
    ) -> RingResult<Self> {
        Self::create_with(capacity, max_message_size, path, consumers, Box::new(M::default))
    }
}

impl<M: MemorySerializable> BroadcastRingProducer<M> {
    pub fn create_with(
        capacity: usize,
        max_message_size: usize,
        path: impl AsRef<Path>,
        consumers: usize,
        builder: Box<dyn Fn() -> M + Send>,
    ) -> RingResult<Self> {
        let path = path.as_ref();
        validate_ring_parameters(capacity, max_message_size)?;
        if consumers == 0 {
            return Err(RingError::invalid("broadcast ring needs at least one consumer"));
        }

        let header_size = broadcast_header_size(consumers);
        let required = required_file_size(header_size, capacity, max_message_size);
        if path.is_file() {
            validate_file_length(path, required)?;
        }
        let region = SharedRegion::open(path, required)?;

        let offer_sequence = SequenceCell::at(0);
        let fetch_sequences: Vec<SequenceCell> =
            (0..consumers).map(|i| SequenceCell::at(i + 1)).collect();
        let last_offered = offer_sequence.get(&region);
        let min_fetched = fetch_sequences
            .iter()
            .map(|cell| cell.get(&region))
            .min()
            .unwrap_or(0);

        debug!(
            path = %path.display(),
            capacity,
            max_message_size,
            consumers,
            last_offered,
            "broadcast ring producer attached"
        );

        Ok(Self {
            region,
            indexer: SlotIndexer::new(capacity),
            max_message_size,
            header_size,
            last_offered,
            max_seq_before_wrapping: min_fetched + capacity as i64,
            offer_sequence,
            fetch_sequences,
            pool: MessagePool::new(POOL_PREBUILD, builder),
        })
    }

    /// Number of consumers this ring was sized for.
    pub fn consumers(&self) -> usize {
        self.fetch_sequences.len()
    }

    /// Removes a consumer from the producer's pacing so a stuck or dead
    /// consumer cannot stall the ring forever. Messages the disabled
    /// consumer had not fetched are lost to it.
    pub fn disable_consumer(&mut self, consumer_index: usize) {
        self.fetch_sequences[consumer_index].set(&self.region, DISABLED_SENTINEL);
    }

    fn min_fetch_sequence(&self) -> i64 {
        self.fetch_sequences
            .iter()
            .map(|cell| cell.get(&self.region))
            .min()
            .unwrap_or(0)
    }
}

impl<M: MemorySerializable> RingProducer<M> for BroadcastRingProducer<M> {
    fn next_to_dispatch(&mut self) -> Option<&mut M> {
        self.last_offered += 1;
        if self.last_offered > self.max_seq_before_wrapping {
            self.max_seq_before_wrapping =
                self.min_fetch_sequence() + self.indexer.capacity() as i64;
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
            let offset = self.header_size + self.indexer.index(seq) * self.max_message_size;
            message.write_to(&self.region, offset);
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
        debug!(path = %self.region.path().display(), "broadcast ring producer closed");
        self.region.release(delete_file)?;
        Ok(())
    }
}

impl<M: MemorySerializable> std::fmt::Debug for BroadcastRingConsumer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastRingConsumer").finish()
    }
}

/// One consumer of the broadcast ring, identified by its index.
pub struct BroadcastRingConsumer<M: MemorySerializable> {
    region: SharedRegion,
    indexer: SlotIndexer,
    max_message_size: usize,
    header_size: usize,
    consumers: usize,
    last_fetched: i64,
    fetch_count: i64,
    offer_sequence: SequenceCell,
    fetch_sequence: SequenceCell,
    data: M,
}

impl<M: MemorySerializable + Default> BroadcastRingConsumer<M> {
    pub fn open(
        capacity: Option<usize>,
        max_message_size: usize,
        path: impl AsRef<Path>,
        consumer_index: usize,
        consumers: Option<usize>,
    ) -> RingResult<Self> {
        Self::open_with(
            capacity,
            max_message_size,
            path,
            consumer_index,
            consumers,
            M::default(),
        )
    }
}

impl<M: MemorySerializable> BroadcastRingConsumer<M> {
    /// Opens the ring at `path` as consumer `consumer_index`.
    ///
    /// At least one of `capacity` and `consumers` must be supplied; a
    /// `None` is inferred from the file length, which requires the file
    /// to exist.
    pub fn open_with(
        capacity: Option<usize>,
        max_message_size: usize,
        path: impl AsRef<Path>,
        consumer_index: usize,
        consumers: Option<usize>,
        message: M,
    ) -> RingResult<Self> {
        let path = path.as_ref();

        let (capacity, consumers) = match (capacity, consumers) {
            (None, None) => {
                return Err(RingError::invalid(
                    "capacity or number of consumers must be supplied (at least one)",
                ));
            }
            (Some(cap), Some(n)) => (cap, n),
            (None, Some(n)) => (infer_capacity(path, max_message_size, n)?, n),
            (Some(cap), None) => (cap, infer_consumers(path, max_message_size, cap)?),
        };

        validate_ring_parameters(capacity, max_message_size)?;
        if consumers == 0 {
            return Err(RingError::invalid("broadcast ring needs at least one consumer"));
        }
        if consumer_index >= consumers {
            return Err(RingError::invalid(format!(
                "consumer index {consumer_index} out of range for {consumers} consumers"
            )));
        }

        let header_size = broadcast_header_size(consumers);
        let required = required_file_size(header_size, capacity, max_message_size);
        if path.is_file() {
            validate_file_length(path, required)?;
        }
        let region = SharedRegion::open(path, required)?;

        let offer_sequence = SequenceCell::at(0);
        let fetch_sequence = SequenceCell::at(consumer_index + 1);
        let last_fetched = fetch_sequence.get(&region);

        debug!(
            path = %path.display(),
            capacity,
            max_message_size,
            consumer_index,
            consumers,
            last_fetched,
            "broadcast ring consumer attached"
        );

        Ok(Self {
            region,
            indexer: SlotIndexer::new(capacity),
            max_message_size,
            header_size,
            consumers,
            last_fetched,
            fetch_count: 0,
            offer_sequence,
            fetch_sequence,
            data: message,
        })
    }

    /// Number of consumers the producer expects, this one included.
    pub fn consumers(&self) -> usize {
        self.consumers
    }

    #[inline]
    fn slot_offset(&self, seq: i64) -> usize {
        self.header_size + self.indexer.index(seq) * self.max_message_size
    }
}

impl<M: MemorySerializable> RingConsumer<M> for BroadcastRingConsumer<M> {
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
        debug!(path = %self.region.path().display(), "broadcast ring consumer closed");
        self.region.release(delete_file)?;
        Ok(())
    }
}

fn infer_capacity(path: &Path, max_message_size: usize, consumers: usize) -> RingResult<usize> {
    let file_length = existing_file_length(path)?;
    let header = broadcast_header_size(consumers) as u64;
    Ok((file_length.saturating_sub(header) / max_message_size as u64) as usize)
}

fn infer_consumers(path: &Path, max_message_size: usize, capacity: usize) -> RingResult<usize> {
    let file_length = existing_file_length(path)?;
    let data = capacity as u64 * max_message_size as u64;
    let header = file_length.saturating_sub(data);
    Ok((header.saturating_sub(CACHE_LINE as u64) / CACHE_LINE as u64) as usize)
}

fn existing_file_length(path: &Path) -> RingResult<u64> {
    if !path.is_file() {
        return Err(RingError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    Ok(std::fs::metadata(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_messages::TopOfBook;
    use std::path::PathBuf;

    fn ring_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("basalt_broadcast_{label}_{}", std::process::id()))
    }

    fn send(producer: &mut BroadcastRingProducer<TopOfBook>, id: u64) -> bool {
        match producer.next_to_dispatch() {
            Some(m) => {
                m.ts_event_ns = id;
                true
            }
            None => false,
        }
    }

    fn open_consumer(
        path: &Path,
        index: usize,
    ) -> BroadcastRingConsumer<TopOfBook> {
        BroadcastRingConsumer::open(Some(8), TopOfBook::MAX_SIZE, path, index, Some(3)).unwrap()
    }

    #[test]
    fn every_consumer_sees_every_message_in_order() {
        let path = ring_path("fanout");
        let mut producer =
            BroadcastRingProducer::<TopOfBook>::create(8, TopOfBook::MAX_SIZE, &path, 3).unwrap();
        let mut consumers: Vec<_> = (0..3).map(|i| open_consumer(&path, i)).collect();

        for id in 1..=6 {
            assert!(send(&mut producer, id));
        }
        producer.flush();

        for consumer in &mut consumers {
            assert_eq!(consumer.available_to_fetch(), 6);
            for id in 1..=6 {
                assert_eq!(consumer.fetch().unwrap().ts_event_ns, id);
            }
            consumer.done_fetching();
        }

        producer.close(false).unwrap();
        for consumer in consumers {
            consumer.close(false).unwrap();
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn slowest_consumer_gates_the_producer() {
        let path = ring_path("slowest");
        let mut producer =
            BroadcastRingProducer::<TopOfBook>::create(8, TopOfBook::MAX_SIZE, &path, 3).unwrap();
        let mut consumers: Vec<_> = (0..3).map(|i| open_consumer(&path, i)).collect();

        for id in 1..=8 {
            assert!(send(&mut producer, id));
        }
        producer.flush();
        assert!(producer.next_to_dispatch().is_none());

        // Two of three acknowledge; the laggard still gates.
        for consumer in consumers.iter_mut().take(2) {
            while consumer.available_to_fetch() > 0 {
                consumer.fetch().unwrap();
            }
            consumer.done_fetching();
        }
        assert!(producer.next_to_dispatch().is_none());

        // The last acknowledgement opens the window.
        while consumers[2].available_to_fetch() > 0 {
            consumers[2].fetch().unwrap();
        }
        consumers[2].done_fetching();
        assert!(send(&mut producer, 9));
        producer.flush();

        producer.close(false).unwrap();
        for consumer in consumers {
            consumer.close(false).unwrap();
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn disabling_a_consumer_unblocks_the_producer() {
        let path = ring_path("disable");
        let mut producer =
            BroadcastRingProducer::<TopOfBook>::create(8, TopOfBook::MAX_SIZE, &path, 3).unwrap();
        let mut consumers: Vec<_> = (0..3).map(|i| open_consumer(&path, i)).collect();

        for id in 1..=8 {
            assert!(send(&mut producer, id));
        }
        producer.flush();

        // Consumer 1 never fetches. Disable it and the ring drains on
        // the strength of the other two.
        for index in [0usize, 2] {
            while consumers[index].available_to_fetch() > 0 {
                consumers[index].fetch().unwrap();
            }
            consumers[index].done_fetching();
        }
        assert!(producer.next_to_dispatch().is_none());
        producer.disable_consumer(1);
        assert!(send(&mut producer, 9));
        producer.flush();

        producer.close(false).unwrap();
        for consumer in consumers {
            consumer.close(false).unwrap();
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn capacity_and_consumers_are_inferred_from_file_length() {
        let path = ring_path("infer");
        let producer =
            BroadcastRingProducer::<TopOfBook>::create(16, TopOfBook::MAX_SIZE, &path, 3).unwrap();

        let from_consumers: BroadcastRingConsumer<TopOfBook> =
            BroadcastRingConsumer::open(None, TopOfBook::MAX_SIZE, &path, 0, Some(3)).unwrap();
        assert_eq!(from_consumers.capacity(), 16);

        let from_capacity: BroadcastRingConsumer<TopOfBook> =
            BroadcastRingConsumer::open(Some(16), TopOfBook::MAX_SIZE, &path, 1, None).unwrap();
        assert_eq!(from_capacity.consumers(), 3);

        let err = BroadcastRingConsumer::<TopOfBook>::open(
            None,
            TopOfBook::MAX_SIZE,
            &path,
            0,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RingError::InvalidArgument { .. }));

        producer.close(false).unwrap();
        from_consumers.close(false).unwrap();
        from_capacity.close(false).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn consumer_index_is_bounds_checked() {
        let path = ring_path("index");
        let producer =
            BroadcastRingProducer::<TopOfBook>::create(8, TopOfBook::MAX_SIZE, &path, 2).unwrap();
        let err = BroadcastRingConsumer::<TopOfBook>::open(
            Some(8),
            TopOfBook::MAX_SIZE,
            &path,
            2,
            Some(2),
        )
        .unwrap_err();
        assert!(matches!(err, RingError::InvalidArgument { .. }));
        producer.close(true).unwrap();
    }
}

//! Concurrent producer/consumer run over the blocking SPSC ring.
//!
//! A million messages cross the ring in random-sized batches while both
//! sides busy-spin, which is the documented wait strategy. The consumer
//! records every message id and every batch size so the run can be
//! checked for ordering, duplicates, and batch accounting afterwards.

use basalt_messages::TopOfBook;
use basalt_ring::{
    BlockingRingConsumer, BlockingRingProducer, RingConsumer, RingProducer,
};
use std::path::PathBuf;

const MESSAGES_TO_SEND: u64 = 1_000_000;
const MAX_BATCH_SIZE: u64 = 100;
const CAPACITY: usize = 1024;

fn ring_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("basalt_test_blocking_{label}_{}", std::process::id()))
}

/// Cheap deterministic batch-size generator; the exact distribution is
/// irrelevant, it only has to vary.
fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

#[test]
fn million_messages_arrive_ordered_and_complete() {
    let path = ring_path("million");

    // Construct both sides before spawning so neither races the file
    // initialization.
    let mut producer = BlockingRingProducer::<TopOfBook>::create(
        Some(CAPACITY),
        Some(TopOfBook::MAX_SIZE),
        &path,
    )
    .unwrap();
    let mut consumer =
        BlockingRingConsumer::<TopOfBook>::open(None, None, &path).unwrap();
    assert_eq!(consumer.capacity(), CAPACITY);

    let producer_thread = std::thread::spawn(move || {
        let mut id_to_send: u64 = 1;
        let mut rng: u64 = 0x9E3779B97F4A7C15;
        let mut remaining = MESSAGES_TO_SEND;

        while remaining > 0 {
            let batch = (xorshift(&mut rng) % MAX_BATCH_SIZE + 1).min(remaining);
            for _ in 0..batch {
                loop {
                    match producer.next_to_dispatch() {
                        Some(m) => {
                            m.ts_event_ns = id_to_send;
                            m.bid_px_ticks = 1000 + id_to_send as i64;
                            id_to_send += 1;
                            break;
                        }
                        // Ring full: busy spin until the consumer acknowledges.
                        None => std::hint::spin_loop(),
                    }
                }
            }
            producer.flush();
            remaining -= batch;
        }

        producer.close(false).unwrap();
    });

    let consumer_thread = std::thread::spawn(move || {
        let mut received: Vec<u64> = Vec::with_capacity(MESSAGES_TO_SEND as usize);
        let mut batch_sum: u64 = 0;
        let mut running = true;

        while running {
            let available = consumer.available_to_fetch();
            if available > 0 {
                for _ in 0..available {
                    let m = consumer.fetch().unwrap();
                    received.push(m.ts_event_ns);
                    if m.ts_event_ns == MESSAGES_TO_SEND {
                        running = false;
                    }
                }
                consumer.done_fetching();
                batch_sum += available as u64;
            } else {
                std::hint::spin_loop();
            }
        }

        consumer.close(true).unwrap();
        (received, batch_sum)
    });

    producer_thread.join().unwrap();
    let (received, batch_sum) = consumer_thread.join().unwrap();

    // All messages arrived, none twice, all in publication order.
    assert_eq!(received.len() as u64, MESSAGES_TO_SEND);
    assert!(
        received.iter().enumerate().all(|(i, &id)| id == i as u64 + 1),
        "messages out of order or duplicated"
    );
    // The batch sizes reported by available_to_fetch account for every message.
    assert_eq!(batch_sum, MESSAGES_TO_SEND);
}

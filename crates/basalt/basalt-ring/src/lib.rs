//! `basalt-ring`: lock-free shared-memory ring transport.
//!
//! One producer publishes fixed-layout messages into a bounded circular
//! buffer backed by a memory-mapped file; one or more consumers in other
//! processes observe them in publication order. Synchronization is a pair
//! of monotonically increasing 64-bit sequence numbers published with
//! release/acquire ordering. No mutexes, no kernel calls, no allocation
//! on the hot path.
//!
//! # Ring variants
//!
//! - [`BlockingRingProducer`] / [`BlockingRingConsumer`]: bounded SPSC.
//!   The producer waits (by returning `None`) when the ring is full.
//! - [`NonBlockingRingProducer`] / [`NonBlockingRingConsumer`]: SPSC
//!   where the producer overwrites instead of waiting; the consumer
//!   detects being lapped, with an optional per-slot checksum.
//! - [`BroadcastRingProducer`] / [`BroadcastRingConsumer`]: bounded SPMC
//!   where every consumer sees every message and the slowest active
//!   consumer paces the producer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐      memory-mapped file       ┌──────────────┐
//! │   Producer   │ ───────────────────────────── │  Consumer 0  │
//! │ (Process A)  │   [cells][slot][slot][slot]   │ (Process B)  │
//! └──────────────┘                               └──────────────┘
//!                                                ┌──────────────┐
//!                                                │  Consumer N  │  (broadcast)
//!                                                └──────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use basalt_ring::{BlockingRingProducer, BlockingRingConsumer, RingProducer, RingConsumer};
//! use basalt_messages::TopOfBook;
//!
//! // Producer process
//! let mut producer =
//!     BlockingRingProducer::<TopOfBook>::create(Some(1024), Some(TopOfBook::MAX_SIZE), "/dev/shm/md_bus")?;
//! while producer.next_to_dispatch().is_none() {} // busy spin while full
//! producer.flush();
//!
//! // Consumer process (parameters discovered from the file)
//! let mut consumer = BlockingRingConsumer::<TopOfBook>::open(None, None, "/dev/shm/md_bus")?;
//! let available = consumer.available_to_fetch();
//! for _ in 0..available {
//!     let event = consumer.fetch().unwrap();
//! }
//! consumer.done_fetching();
//! ```

mod api;
mod blocking;
mod broadcast;
mod checksum;
mod config;
mod error;
mod layout;
mod nonblocking;
mod pool;
mod seq;

pub use api::{RingConsumer, RingProducer};
pub use blocking::{BlockingRingConsumer, BlockingRingProducer};
pub use broadcast::{BroadcastRingConsumer, BroadcastRingProducer};
pub use config::{ConfigError, RingConfig};
pub use error::{RingError, RingResult};
pub use layout::DEFAULT_CAPACITY;
pub use nonblocking::{NonBlockingRingConsumer, NonBlockingRingProducer};
pub use pool::MessagePool;

// The serialization contract lives next to the memory primitive.
pub use basalt_mmap::{MemorySerializable, SharedRegion};

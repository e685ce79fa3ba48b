//! Garbage-free message pool and in-flight list.
//!
//! Producers claim message instances between `next_to_dispatch` and
//! `flush`. The pool keeps every instance it has ever built and hands
//! them out again by position, so the combined pool + pending list is a
//! single `Vec` with a cursor: `slots[..in_flight]` is the in-flight
//! list in claim order, `slots[in_flight..]` are idle instances. Steady
//! state allocates nothing.

/// Pool of reusable message instances doubling as the producer's
/// in-flight list.
pub struct MessagePool<M> {
    slots: Vec<M>,
    in_flight: usize,
    build: Box<dyn Fn() -> M + Send>,
}

impl<M> MessagePool<M> {
    /// Creates a pool with `prebuilt` instances constructed up front.
    pub fn new(prebuilt: usize, build: Box<dyn Fn() -> M + Send>) -> Self {
        let mut slots = Vec::with_capacity(prebuilt);
        for _ in 0..prebuilt {
            slots.push(build());
        }
        Self {
            slots,
            in_flight: 0,
            build,
        }
    }

    /// Claims the next instance, appending it to the in-flight list.
    /// Builds a new instance only when the list has never been this deep.
    #[inline]
    pub fn claim(&mut self) -> &mut M {
        if self.in_flight == self.slots.len() {
            self.slots.push((self.build)());
        }
        let i = self.in_flight;
        self.in_flight += 1;
        &mut self.slots[i]
    }

    /// Drops the most recently claimed instance back into the idle set.
    #[inline]
    pub fn unclaim(&mut self) {
        debug_assert!(self.in_flight > 0, "unclaim with nothing in flight");
        self.in_flight -= 1;
    }

    /// The in-flight list, in claim order.
    #[inline]
    pub fn pending(&self) -> &[M] {
        &self.slots[..self.in_flight]
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Returns every in-flight instance to the idle set. The instances
    /// are retained for reuse, not dropped.
    #[inline]
    pub fn clear(&mut self) {
        self.in_flight = 0;
    }
}

impl<M: Default + 'static> MessagePool<M> {
    /// Pool whose instances are built with `Default`.
    pub fn with_default(prebuilt: usize) -> Self {
        Self::new(prebuilt, Box::new(M::default))
    }
}

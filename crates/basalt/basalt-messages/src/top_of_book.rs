use basalt_mmap::{MemorySerializable, SharedRegion};

// SymbolId is consistent and stable across all processes.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SymbolId(pub u16);

/// Top-of-book market data event with a fixed wire layout.
///
/// Prices are integer ticks and quantities integer lots, so the wire
/// format has no floating point. Field order on the wire matches field
/// order here, all little-endian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TopOfBook {
    pub ts_event_ns: u64,
    pub symbol_id: SymbolId,
    pub bid_px_ticks: i64,
    pub bid_qty_lots: i64,
    pub ask_px_ticks: i64,
    pub ask_qty_lots: i64,
}

impl TopOfBook {
    /// Encoded size: u64 timestamp + u16 symbol + four i64 sides.
    pub const MAX_SIZE: usize = 8 + 2 + 4 * 8;

    #[inline]
    pub fn mid_ticks(&self) -> i64 {
        (self.bid_px_ticks + self.ask_px_ticks) / 2
    }
}

impl MemorySerializable for TopOfBook {
    fn write_to(&self, region: &SharedRegion, offset: usize) -> usize {
        region.put_long(offset, self.ts_event_ns as i64);
        region.put_short(offset + 8, self.symbol_id.0 as i16);
        region.put_long(offset + 10, self.bid_px_ticks);
        region.put_long(offset + 18, self.bid_qty_lots);
        region.put_long(offset + 26, self.ask_px_ticks);
        region.put_long(offset + 34, self.ask_qty_lots);
        Self::MAX_SIZE
    }

    fn read_from(&mut self, region: &SharedRegion, offset: usize) -> usize {
        self.ts_event_ns = region.get_long(offset) as u64;
        self.symbol_id = SymbolId(region.get_short(offset + 8) as u16);
        self.bid_px_ticks = region.get_long(offset + 10);
        self.bid_qty_lots = region.get_long(offset + 18);
        self.ask_px_ticks = region.get_long(offset + 26);
        self.ask_qty_lots = region.get_long(offset + 34);
        Self::MAX_SIZE
    }
}

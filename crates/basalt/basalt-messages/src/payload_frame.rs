use basalt_mmap::{MemorySerializable, SharedRegion};

/// Message-agnostic carrier: a 4-byte length prefix and an opaque
/// payload of up to `max_payload_size` bytes.
///
/// Rings parameterized with `PayloadFrame` move arbitrary bytes, which
/// makes the transport payload-agnostic at the cost of one copy into
/// the frame's buffer. The buffer is allocated once at construction and
/// reused for every message, so the ring's max message size must be
/// [`PayloadFrame::max_size_for`] the chosen payload bound.
#[derive(Debug, Clone)]
pub struct PayloadFrame {
    len: usize,
    buf: Box<[u8]>,
}

impl PayloadFrame {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            len: 0,
            buf: vec![0u8; max_payload_size].into_boxed_slice(),
        }
    }

    /// Ring slot size needed for frames of up to `max_payload_size` bytes.
    pub const fn max_size_for(max_payload_size: usize) -> usize {
        4 + max_payload_size
    }

    pub fn max_payload_size(&self) -> usize {
        self.buf.len()
    }

    /// Copies `bytes` into the frame.
    ///
    /// # Panics
    /// Panics if `bytes` exceeds the frame's payload bound.
    pub fn set_payload(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.buf.len(),
            "payload of {} bytes exceeds frame bound of {}",
            bytes.len(),
            self.buf.len()
        );
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl MemorySerializable for PayloadFrame {
    fn write_to(&self, region: &SharedRegion, offset: usize) -> usize {
        region.put_int(offset, self.len as i32);
        region.put_bytes(offset + 4, &self.buf[..self.len]);
        4 + self.len
    }

    fn read_from(&mut self, region: &SharedRegion, offset: usize) -> usize {
        let len = region.get_int(offset) as usize;
        debug_assert!(len <= self.buf.len(), "frame on the wire exceeds payload bound");
        self.len = len.min(self.buf.len());
        region.get_bytes(offset + 4, &mut self.buf[..self.len]);
        4 + self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(PayloadFrame::max_size_for(1024), 1028);
        let frame = PayloadFrame::new(64);
        assert_eq!(frame.max_payload_size(), 64);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn codec_round_trip() {
        let path = std::env::temp_dir().join(format!("basalt_frame_{}", std::process::id()));
        let region = SharedRegion::open(&path, 256).unwrap();

        let mut frame = PayloadFrame::new(32);
        frame.set_payload(b"opaque payload");
        let written = frame.write_to(&region, 50);
        assert_eq!(written, 4 + 14);

        let mut decoded = PayloadFrame::new(32);
        let read = decoded.read_from(&region, 50);
        assert_eq!(read, written);
        assert_eq!(decoded.payload(), b"opaque payload");

        // Shorter payloads shrink the frame on reuse.
        frame.set_payload(b"x");
        frame.write_to(&region, 50);
        decoded.read_from(&region, 50);
        assert_eq!(decoded.payload(), b"x");

        region.release(true).unwrap();
    }

    #[test]
    #[should_panic(expected = "exceeds frame bound")]
    fn oversized_payload_panics() {
        let mut frame = PayloadFrame::new(4);
        frame.set_payload(b"too large");
    }
}

//! Per-slot integrity checksum for the non-blocking ring.
//!
//! The checksum is XXH64 with seed 7 over the 8-byte big-endian sequence
//! number followed by the serialized message bytes. Including the
//! sequence means a stale slot from an earlier lap never verifies, even
//! when its payload bytes happen to be intact.

use xxhash_rust::xxh64::Xxh64;

/// Seed shared by every participant.
pub(crate) const CHECKSUM_SEED: u64 = 7;

/// Bytes reserved at the head of a slot when checksums are enabled.
pub(crate) const CHECKSUM_SIZE: usize = 8;

/// Hash of `(sequence || payload)`.
#[inline]
pub(crate) fn slot_checksum(sequence: i64, payload: &[u8]) -> u64 {
    let mut hasher = Xxh64::new(CHECKSUM_SEED);
    hasher.update(&sequence.to_be_bytes());
    hasher.update(payload);
    hasher.digest()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = slot_checksum(42, b"some payload bytes");
        let b = slot_checksum(42, b"some payload bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn sequence_is_part_of_the_hash() {
        let payload = b"identical payload";
        assert_ne!(slot_checksum(1, payload), slot_checksum(2, payload));
    }

    #[test]
    fn payload_corruption_changes_the_hash() {
        let mut payload = *b"identical payload";
        let clean = slot_checksum(9, &payload);
        payload[3] ^= 0x01;
        assert_ne!(clean, slot_checksum(9, &payload));
    }

    #[test]
    fn matches_one_shot_xxh64() {
        // Streaming over (seq || payload) must equal hashing the
        // concatenated buffer in one call.
        let seq: i64 = 123_456_789;
        let payload = b"0123456789abcdef0123456789abcdef0123456789"; // > 32 B, exercises the lane loop
        let mut joined = Vec::new();
        joined.extend_from_slice(&seq.to_be_bytes());
        joined.extend_from_slice(payload);
        assert_eq!(
            slot_checksum(seq, payload),
            xxhash_rust::xxh64::xxh64(&joined, CHECKSUM_SEED)
        );
    }
}

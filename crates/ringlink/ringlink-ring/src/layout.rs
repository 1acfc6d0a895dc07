//! Byte layout shared by both directions of the transport.
//!
//! Every ring is a flat byte region of capacity `C`. The first two bytes hold
//! the published cursor, the third byte is never touched, and the rest is the
//! cyclic payload area.
//!
//! # Memory Layout
//!
//! ```text
//! offset  0        2    3                                              C
//!         ┌────────┬────┬──────────────────────────────────────────────┐
//!         │ cursor │gap │                payload (cyclic)              │
//!         │ u16 LE │ 1B │  writes past C-1 continue at WRAP_START (3)  │
//!         └────────┴────┴──────────────────────────────────────────────┘
//! ```
//!
//! The gap at offset 2 is part of the wire contract: both sides wrap to
//! offset 3, so removing it would shift every cursor the peer computes.

use crate::error::RingError;

/// Size of the little-endian cursor stored at the start of every ring.
pub const HEADER_BYTES: usize = 2;

/// Offset of the unused byte between the header and the payload.
pub const RESERVED_GAP: usize = HEADER_BYTES;

/// First payload offset. A cursor that reaches `C` continues here, and an
/// empty ring publishes this value.
pub const WRAP_START: usize = HEADER_BYTES + 1;

/// Smallest usable ring: two payload bytes, so one byte can be in flight
/// without the cursor lapping itself.
pub const MIN_CAPACITY: usize = WRAP_START + 2;

/// Largest ring addressable by a 16-bit cursor (cursor values stay below `C`).
pub const MAX_CAPACITY: usize = u16::MAX as usize + 1;

/// Capacity used when the caller does not pick one.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Checks that `capacity` fits the header and the 16-bit cursor.
pub fn validate_capacity(capacity: usize) -> Result<(), RingError> {
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
        return Err(RingError::Capacity {
            capacity,
            min: MIN_CAPACITY,
            max: MAX_CAPACITY,
        });
    }
    Ok(())
}

/// Number of payload bytes in a ring of the given capacity.
#[inline(always)]
pub fn payload_capacity(capacity: usize) -> usize {
    capacity - WRAP_START
}

/// Returns true if `cursor` is a legal published value for a ring of `capacity`.
#[inline(always)]
pub fn is_valid_cursor(capacity: usize, cursor: usize) -> bool {
    (WRAP_START..capacity).contains(&cursor)
}

/// Decodes the cursor stored in the first [`HEADER_BYTES`] of `buffer`.
///
/// # Panics
/// Panics if `buffer` is shorter than the header.
#[inline]
pub fn read_cursor(buffer: &[u8]) -> usize {
    u16::from_le_bytes([buffer[0], buffer[1]]) as usize
}

/// Encodes `cursor` into the first [`HEADER_BYTES`] of `buffer`.
///
/// # Panics
/// Panics if `buffer` is shorter than the header.
#[inline]
pub fn write_cursor(buffer: &mut [u8], cursor: usize) {
    debug_assert!(cursor <= u16::MAX as usize);
    buffer[..HEADER_BYTES].copy_from_slice(&(cursor as u16).to_le_bytes());
}

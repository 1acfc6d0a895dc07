//! Cursor arithmetic and the pure wraparound copy helpers.
//!
//! These functions operate on plain slices and index values; they never touch
//! shared memory. The shared ring in [`crate::RingBuffer`] drives the same
//! [`for_each_chunk`] walk over its mapped region, so the slice versions here
//! are the reference for what the live transport does.
//!
//! # Wraparound
//!
//! With `C = 16` and a cursor at 10, writing `"ABCDEFGH"` splits into two
//! chunks:
//!
//! ```text
//! offset   0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
//!          [hdr][g] G H . . . .  A  B  C  D  E  F
//!                   ^ new cursor 5
//! ```

use crate::layout::{WRAP_START, write_cursor};
use std::ops::Range;

/// Number of bytes between `current` and `target` in a ring of `capacity`.
///
/// `current < target` is the contiguous case. Anything else is treated as a
/// wrap, including `current == target`, which therefore describes a full lap
/// of `capacity - WRAP_START` bytes. Callers that want "nothing new" must
/// compare the cursors before asking for a span.
///
/// ```
/// use ringlink_ring::span_len;
/// assert_eq!(span_len(16, 4, 9), 5);
/// assert_eq!(span_len(16, 10, 5), 8); // (16 - 10) + (5 - 3)
/// assert_eq!(span_len(16, 7, 7), 13); // full lap
/// ```
#[inline(always)]
pub fn span_len(capacity: usize, current: usize, target: usize) -> usize {
    if current < target {
        target - current
    } else {
        (capacity - current) + (target - WRAP_START)
    }
}

/// Cursor reached after moving `len` bytes forward from `cursor`.
///
/// A cursor landing exactly on `capacity` is folded back to [`WRAP_START`], so
/// the result always satisfies the published-cursor invariant.
#[inline]
pub fn advance(capacity: usize, cursor: usize, len: usize) -> usize {
    for_each_chunk(capacity, cursor, len, |_, _| {})
}

/// Walks `len` bytes of a ring starting at `start`, one contiguous chunk at a
/// time.
///
/// `f(ring_offset, local)` is called for each chunk: `ring_offset` is where
/// the chunk begins inside the ring, `local` is the matching range in the
/// caller's linear buffer. Returns the cursor following the last byte.
///
/// Lengths larger than the payload area keep wrapping; whether that is legal
/// is the caller's decision.
///
/// # Example
///
/// ```
/// use ringlink_ring::for_each_chunk;
/// let mut chunks = Vec::new();
/// let end = for_each_chunk(16, 10, 8, |at, local| chunks.push((at, local)));
/// assert_eq!(chunks, vec![(10, 0..6), (3, 6..8)]);
/// assert_eq!(end, 5);
/// ```
pub fn for_each_chunk<F>(capacity: usize, start: usize, len: usize, mut f: F) -> usize
where
    F: FnMut(usize, Range<usize>),
{
    debug_assert!((WRAP_START..capacity).contains(&start));

    let mut at = start;
    let mut done = 0;
    while done < len {
        let n = (len - done).min(capacity - at);
        f(at, done..done + n);
        done += n;
        at += n;
        if at == capacity {
            at = WRAP_START;
        }
    }
    at
}

/// Copies the bytes between two cursors out of `buffer`.
///
/// The capacity is `buffer.len()`. In the wrap case the result is
/// `buffer[current..C] ++ buffer[WRAP_START..target]`.
///
/// ```
/// use ringlink_ring::extract;
/// let mut ring = *b"\0\0\0GHxxxxxABCDEF";
/// assert_eq!(extract(&ring, 10, 5), b"ABCDEFGH");
/// assert_eq!(extract(&ring, 10, 13), b"ABC");
/// ring[3] = b'g';
/// assert_eq!(extract(&ring, 14, 4), b"EFg");
/// ```
pub fn extract(buffer: &[u8], current: usize, target: usize) -> Vec<u8> {
    let capacity = buffer.len();
    let len = span_len(capacity, current, target);
    let mut out = Vec::with_capacity(len);
    for_each_chunk(capacity, current, len, |at, local| {
        out.extend_from_slice(&buffer[at..at + local.len()]);
    });
    out
}

/// Copies `payload` into `buffer` starting at `current`, then stores the new
/// cursor in the header.
///
/// The header is written only once the whole payload is in place, mirroring
/// the publish-after-write order of the shared ring.
pub fn write(buffer: &mut [u8], current: usize, payload: &[u8]) -> usize {
    let capacity = buffer.len();
    let next = for_each_chunk(capacity, current, payload.len(), |at, local| {
        buffer[at..at + local.len()].copy_from_slice(&payload[local]);
    });
    write_cursor(buffer, next);
    next
}

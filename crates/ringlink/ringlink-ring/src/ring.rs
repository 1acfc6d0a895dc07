//! Single-producer, single-consumer byte ring over a shared memory region.
//!
//! A [`RingBuffer`] is a cheap, cloneable handle to one mapped region. The
//! producer side is a [`RingWriter`], the consumer side a [`RingReader`]; each
//! ring hands out at most one of each at a time, which is what makes the
//! lock-free protocol sound.
//!
//! # Protocol
//!
//! **Writer:**
//! 1. Copy the payload into the cyclic area, starting at its own cursor
//! 2. Store the new cursor into the header with `Release` ordering
//!
//! **Reader:**
//! 1. Load the header cursor with `Acquire` ordering
//! 2. If it equals the local position there is nothing new
//! 3. Otherwise copy the span from the local position up to the cursor
//!
//! The `Release`/`Acquire` pair guarantees that every byte before a published
//! cursor is visible to a reader that observed that cursor.
//!
//! # Thread Safety
//! - `RingBuffer` is `Send + Sync`; it only exposes the published cursor.
//! - `RingWriter` and `RingReader` are `Send` but NOT `Sync`.

use crate::error::RingError;
use crate::layout::{WRAP_START, is_valid_cursor, payload_capacity, validate_capacity};
use crate::wrap::{for_each_chunk, span_len};
use ringlink_mmap::SharedRegion;
use std::fmt;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

struct RingShared {
    region: SharedRegion,
    capacity: usize,
    writer_claimed: AtomicBool,
    reader_claimed: AtomicBool,
}

// SAFETY: the region is only touched through the SPSC protocol above. The
// header is accessed atomically; payload bytes are written by the single
// writer before publication and read by the single reader after it.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

/// Handle to a ring living in a shared region.
///
/// Cloning the handle does not copy the ring; all clones see the same memory.
#[derive(Clone)]
pub struct RingBuffer {
    shared: Arc<RingShared>,
}

impl RingBuffer {
    /// Allocates an in-process ring of `capacity` bytes with an empty cursor.
    ///
    /// # Errors
    /// [`RingError::Capacity`] if `capacity` is outside
    /// [`MIN_CAPACITY`](crate::MIN_CAPACITY)..=[`MAX_CAPACITY`](crate::MAX_CAPACITY),
    /// or [`RingError::Map`] if the mapping fails.
    pub fn anonymous(capacity: usize) -> Result<Self, RingError> {
        validate_capacity(capacity)?;
        let region = SharedRegion::anonymous(capacity)?;
        Ok(Self::init(region, capacity))
    }

    /// Creates (or truncates) a file-backed ring that another process can
    /// attach with [`RingBuffer::open`].
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, RingError> {
        validate_capacity(capacity)?;
        let region = SharedRegion::create_rw(path, capacity as u64)?;
        Ok(Self::init(region, capacity))
    }

    /// Attaches to an existing file-backed ring.
    ///
    /// The capacity is the file length. The stored cursor is validated but
    /// left as it is, so a reader attached here follows the live stream.
    ///
    /// # Errors
    /// - The file cannot be opened or mapped
    /// - The file length is not a valid capacity
    /// - The header holds a cursor outside `[WRAP_START, C)`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RingError> {
        let region = SharedRegion::open_rw(path)?;
        let capacity = region.len();
        validate_capacity(capacity)?;

        let ring = Self::from_region(region, capacity);
        let cursor = ring.cursor();
        if !is_valid_cursor(capacity, cursor) {
            return Err(RingError::CorruptCursor { cursor, capacity });
        }
        Ok(ring)
    }

    fn init(region: SharedRegion, capacity: usize) -> Self {
        let ring = Self::from_region(region, capacity);
        ring.publish(WRAP_START);
        ring
    }

    fn from_region(region: SharedRegion, capacity: usize) -> Self {
        Self {
            shared: Arc::new(RingShared {
                region,
                capacity,
                writer_claimed: AtomicBool::new(false),
                reader_claimed: AtomicBool::new(false),
            }),
        }
    }

    /// Total size of the ring in bytes, header included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Largest payload a single [`RingWriter::write`] accepts.
    ///
    /// One byte short of the payload area: a write that filled it completely
    /// would land the cursor back where it started and read as "no data".
    #[inline]
    pub fn max_write(&self) -> usize {
        payload_capacity(self.capacity()) - 1
    }

    /// True if the ring lives in a file rather than anonymous memory.
    pub fn is_file_backed(&self) -> bool {
        self.shared.region.is_file_backed()
    }

    #[inline(always)]
    fn base(&self) -> *mut u8 {
        self.shared.region.as_mut_ptr()
    }

    #[inline(always)]
    fn cursor_cell(&self) -> &AtomicU16 {
        // SAFETY: the region is page aligned and at least MIN_CAPACITY bytes
        // long, so offset 0 is a valid, aligned u16 for the lifetime of `self`.
        unsafe { AtomicU16::from_ptr(self.base() as *mut u16) }
    }

    /// Loads the published cursor.
    ///
    /// `Acquire` pairs with the writer's `Release` store: every payload byte
    /// before the returned cursor is visible once this returns.
    #[inline(always)]
    pub fn cursor(&self) -> usize {
        u16::from_le(self.cursor_cell().load(Ordering::Acquire)) as usize
    }

    #[inline(always)]
    fn publish(&self, cursor: usize) {
        debug_assert!(is_valid_cursor(self.capacity(), cursor));
        self.cursor_cell().store((cursor as u16).to_le(), Ordering::Release);
    }

    /// Claims the producer side of this ring.
    ///
    /// The writer continues from the currently published cursor.
    ///
    /// # Errors
    /// [`RingError::WriterClaimed`] while another `RingWriter` for this ring
    /// is alive in this process.
    pub fn writer(&self) -> Result<RingWriter, RingError> {
        if self.shared.writer_claimed.swap(true, Ordering::AcqRel) {
            return Err(RingError::WriterClaimed);
        }
        Ok(RingWriter {
            cursor: self.cursor(),
            ring: self.clone(),
        })
    }

    /// Claims the consumer side of this ring.
    ///
    /// The reader starts at the currently published cursor (tail-follow), so
    /// it only sees bytes published after it was created.
    ///
    /// # Errors
    /// [`RingError::ReaderClaimed`] while another `RingReader` for this ring
    /// is alive in this process.
    pub fn reader(&self) -> Result<RingReader, RingError> {
        if self.shared.reader_claimed.swap(true, Ordering::AcqRel) {
            return Err(RingError::ReaderClaimed);
        }
        Ok(RingReader {
            position: self.cursor(),
            ring: self.clone(),
        })
    }

    /// Copies the whole region, header included.
    ///
    /// Diagnostic only: the copy is not synchronised with a live writer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.capacity()];
        // SAFETY: the region is `capacity` bytes long and `out` is its own allocation.
        unsafe { ptr::copy_nonoverlapping(self.base(), out.as_mut_ptr(), out.len()) };
        out
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor())
            .field("file_backed", &self.is_file_backed())
            .finish()
    }
}

/// The producer side of a ring.
pub struct RingWriter {
    ring: RingBuffer,
    /// Local copy of the last published cursor; only this writer changes it.
    cursor: usize,
}

impl RingWriter {
    /// Appends `payload` and publishes the new cursor.
    ///
    /// The payload is copied in at most two chunks (the tail of the region,
    /// then from [`WRAP_START`]); the header is only updated afterwards.
    ///
    /// Nothing stops a writer from lapping a slow reader: callers size the
    /// ring for the largest burst between two reader ticks.
    ///
    /// # Errors
    /// [`RingError::PayloadTooLarge`] if `payload` is longer than
    /// [`RingBuffer::max_write`]. The ring is left untouched.
    pub fn write(&mut self, payload: &[u8]) -> Result<usize, RingError> {
        let max = self.ring.max_write();
        if payload.len() > max {
            return Err(RingError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        if payload.is_empty() {
            return Ok(self.cursor);
        }

        let base = self.ring.base();
        let next = for_each_chunk(
            self.ring.capacity(),
            self.cursor,
            payload.len(),
            |at, local| {
                // SAFETY: `at + local.len() <= capacity` by construction of the
                // chunk walk, and the reader never reads past the published cursor.
                unsafe {
                    ptr::copy_nonoverlapping(
                        payload[local.clone()].as_ptr(),
                        base.add(at),
                        local.len(),
                    )
                };
            },
        );

        self.ring.publish(next);
        self.cursor = next;
        Ok(next)
    }

    /// Publishes the empty marker, discarding everything not yet consumed.
    pub fn reset(&mut self) {
        self.cursor = WRAP_START;
        self.ring.publish(WRAP_START);
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        self.ring
            .shared
            .writer_claimed
            .store(false, Ordering::Release);
    }
}

/// The consumer side of a ring.
pub struct RingReader {
    ring: RingBuffer,
    /// Offset of the next unread byte.
    position: usize,
}

impl RingReader {
    /// Bytes published but not yet consumed by this reader.
    #[inline]
    pub fn available(&self) -> usize {
        let target = self.ring.cursor();
        if target == self.position {
            0
        } else {
            span_len(self.ring.capacity(), self.position, target)
        }
    }

    /// Consumes everything published so far.
    pub fn read(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.read_into(&mut out, usize::MAX);
        out
    }

    /// Appends at most `max` unread bytes to `out` and returns how many were
    /// consumed.
    ///
    /// Unconsumed bytes stay in the ring for the next call.
    pub fn read_into(&mut self, out: &mut Vec<u8>, max: usize) -> usize {
        let n = self.available().min(max);
        if n == 0 {
            return 0;
        }

        let start = out.len();
        out.reserve(n);
        let base = self.ring.base();
        let dst = out.as_mut_ptr();
        self.position = for_each_chunk(self.ring.capacity(), self.position, n, |at, local| {
            // SAFETY: the chunk lies before the published cursor, so the writer
            // has finished with it; `out` has room for `n` more bytes.
            unsafe {
                ptr::copy_nonoverlapping(base.add(at), dst.add(start + local.start), local.len())
            };
        });
        // SAFETY: exactly `n` bytes were initialised past `start` above.
        unsafe { out.set_len(start + n) };
        n
    }

    /// Moves the read position back to the empty marker.
    ///
    /// Used after the producer has reset the ring so both sides agree again.
    pub fn rewind(&mut self) {
        self.position = WRAP_START;
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        self.ring
            .shared
            .reader_claimed
            .store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{MAX_CAPACITY, read_cursor};
    use crate::wrap;
    use std::io::Write;

    #[test]
    fn new_ring_publishes_wrap_start() {
        let ring = RingBuffer::anonymous(16).unwrap();
        assert_eq!(ring.cursor(), WRAP_START);
        assert_eq!(read_cursor(&ring.to_bytes()), WRAP_START);
    }

    #[test]
    fn rejects_out_of_range_capacity() {
        assert!(matches!(
            RingBuffer::anonymous(4),
            Err(RingError::Capacity { capacity: 4, .. })
        ));
        assert!(RingBuffer::anonymous(MAX_CAPACITY + 1).is_err());
        assert!(RingBuffer::anonymous(MAX_CAPACITY).is_ok());
    }

    #[test]
    fn shared_write_matches_pure_write() {
        let ring = RingBuffer::anonymous(16).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.reader().unwrap();

        writer.write(b"1234567").unwrap();
        assert_eq!(reader.read(), b"1234567");
        assert_eq!(writer.cursor(), 10);

        writer.write(b"ABCDEFGH").unwrap();
        assert_eq!(writer.cursor(), 5);

        let bytes = ring.to_bytes();
        assert_eq!(&bytes[10..16], b"ABCDEF");
        assert_eq!(&bytes[3..5], b"GH");
        assert_eq!(wrap::extract(&bytes, 10, 5), b"ABCDEFGH");
        assert_eq!(reader.read(), b"ABCDEFGH");
        assert_eq!(reader.position(), 5);
    }

    #[test]
    fn only_one_writer_and_reader_at_a_time() {
        let ring = RingBuffer::anonymous(32).unwrap();
        let writer = ring.writer().unwrap();
        let reader = ring.reader().unwrap();
        assert!(matches!(ring.writer(), Err(RingError::WriterClaimed)));
        assert!(matches!(ring.clone().reader(), Err(RingError::ReaderClaimed)));

        drop(writer);
        drop(reader);
        assert!(ring.writer().is_ok());
        assert!(ring.reader().is_ok());
    }

    #[test]
    fn oversized_payload_is_refused() {
        let ring = RingBuffer::anonymous(16).unwrap();
        let mut writer = ring.writer().unwrap();
        assert_eq!(ring.max_write(), 12);

        let err = writer.write(&[0u8; 13]).unwrap_err();
        assert!(matches!(err, RingError::PayloadTooLarge { len: 13, max: 12 }));
        assert_eq!(ring.cursor(), WRAP_START);
        assert!(writer.write(&[0u8; 12]).is_ok());
    }

    #[test]
    fn partial_read_leaves_the_rest() {
        let ring = RingBuffer::anonymous(16).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.reader().unwrap();

        writer.write(b"abcdefghij").unwrap();
        let mut out = Vec::new();
        assert_eq!(reader.read_into(&mut out, 4), 4);
        assert_eq!(out, b"abcd");
        assert_eq!(reader.available(), 6);

        writer.write(b"XYZ").unwrap();
        assert_eq!(reader.read_into(&mut out, usize::MAX), 9);
        assert_eq!(out, b"abcdefghijXYZ");
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn reset_then_rewind_realigns_both_sides() {
        let ring = RingBuffer::anonymous(32).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.reader().unwrap();

        writer.write(b"stale").unwrap();
        writer.reset();
        reader.rewind();
        assert_eq!(reader.available(), 0);

        writer.write(b"fresh").unwrap();
        assert_eq!(reader.read(), b"fresh");
    }

    #[test]
    fn open_rejects_a_header_outside_the_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        file.flush().unwrap();

        assert!(matches!(
            RingBuffer::open(file.path()),
            Err(RingError::CorruptCursor {
                cursor: 0,
                capacity: 64
            })
        ));
    }

    #[test]
    fn open_rejects_a_file_too_small_for_a_ring() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 4]).unwrap();
        file.flush().unwrap();

        assert!(matches!(
            RingBuffer::open(file.path()),
            Err(RingError::Capacity { capacity: 4, .. })
        ));
    }

    #[test]
    fn open_follows_a_created_ring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring");
        let created = RingBuffer::create(&path, 64).unwrap();
        created.writer().unwrap().write(b"hello").unwrap();

        let attached = RingBuffer::open(&path).unwrap();
        assert_eq!(attached.capacity(), 64);
        assert_eq!(attached.cursor(), WRAP_START + 5);
        assert!(attached.is_file_backed());
    }

    #[test]
    fn spsc_across_threads_preserves_order() {
        use std::sync::atomic::AtomicUsize;

        const TOTAL: usize = 200_000;
        let ring = RingBuffer::anonymous(1024).unwrap();
        let mut writer = ring.writer().unwrap();
        let mut reader = ring.reader().unwrap();
        let consumed = Arc::new(AtomicUsize::new(0));

        let progress = consumed.clone();
        let consumer = std::thread::spawn(move || {
            let mut got = Vec::with_capacity(TOTAL);
            while got.len() < TOTAL {
                if reader.read_into(&mut got, usize::MAX) == 0 {
                    std::hint::spin_loop();
                }
                progress.store(got.len(), Ordering::Release);
            }
            got
        });

        let mut sent = 0usize;
        let mut next_byte = 0u8;
        while sent < TOTAL {
            let chunk: Vec<u8> = (0..(TOTAL - sent).min(97))
                .map(|_| {
                    next_byte = next_byte.wrapping_add(1);
                    next_byte
                })
                .collect();
            // never let the writer lap the consumer
            while sent + chunk.len() - consumed.load(Ordering::Acquire) > ring.max_write() {
                std::hint::spin_loop();
            }
            writer.write(&chunk).unwrap();
            sent += chunk.len();
        }

        let got = consumer.join().unwrap();
        assert_eq!(got.len(), TOTAL);
        let mut expected = 0u8;
        for b in got {
            expected = expected.wrapping_add(1);
            assert_eq!(b, expected);
        }
    }
}

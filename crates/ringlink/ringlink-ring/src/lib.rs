mod error;
mod layout;
mod ring;
mod wrap;

pub use error::RingError;
pub use layout::{
    DEFAULT_CAPACITY, HEADER_BYTES, MAX_CAPACITY, MIN_CAPACITY, RESERVED_GAP, WRAP_START, is_valid_cursor,
    payload_capacity, read_cursor, validate_capacity, write_cursor,
};
pub use ring::{RingBuffer, RingReader, RingWriter};
pub use wrap::{advance, extract, for_each_chunk, span_len, write};

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring capacity {capacity} outside [{min}, {max}]")]
    Capacity {
        capacity: usize,
        min: usize,
        max: usize,
    },

    #[error("payload of {len} bytes exceeds the {max}-byte limit of this ring")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("published cursor {cursor} is outside the payload of a {capacity}-byte ring")]
    CorruptCursor { cursor: usize, capacity: usize },

    #[error("ring writer already claimed")]
    WriterClaimed,

    #[error("ring reader already claimed")]
    ReaderClaimed,

    #[error("failed to map ring region")]
    Map(#[from] io::Error),
}

//! # Framing Error Types
//!
//! Everything that can go wrong while decoding bytes off the wire.
//!
//! A framing error is fatal to the datagram (or control message) that
//! produced it and to nothing else: the channel that read it stays usable.

use thiserror::Error;

/// Errors raised while decoding wire structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Fewer bytes were available than the structure requires.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A declared length field does not fit the remaining buffer.
    #[error("length mismatch: declared {declared} bytes, {remaining} remaining")]
    LengthMismatch {
        /// Length declared by the header.
        declared: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// Bytes were left over after the declared body.
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),

    /// Unknown control message tag.
    #[error("unknown control message tag: {0}")]
    UnknownTag(u8),

    /// A merged frame listed players out of ascending order or twice.
    #[error("merged frame players not strictly ascending at player {0}")]
    UnorderedPlayers(u32),

    /// Structure exceeds what its length field can express.
    #[error("payload too large: {0} bytes")]
    TooLarge(usize),
}

/// Result type for decoding operations.
pub type FramingResult<T> = Result<T, FramingError>;

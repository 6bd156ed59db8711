//! Error types for the codec layer.

use thiserror::Error;

/// Errors raised while decoding a byte stream.
///
/// Any of these aborts the whole decode call: callers discard the payload
/// instead of applying a prefix of it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated input at offset {offset}")]
    TruncatedInput { offset: usize },

    #[error("Varint does not fit in 64 bits at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("Invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("Invalid run length")]
    InvalidRunLength,

    #[error("Clock range overflows 64 bits")]
    ClockOverflow,
}

pub type Result<T> = std::result::Result<T, CodecError>;

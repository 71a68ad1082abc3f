//! Error types for decoding operations.

use std::fmt;

/// Errors that can occur while parsing Potree metadata or node buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input buffer is too small for the expected data.
    BufferTooSmall { expected: usize, actual: usize },
    /// Buffer length is not a whole number of point records.
    MisalignedBuffer { len: usize, record_size: usize },
    /// Invalid data format or structure.
    InvalidFormat {
        context: &'static str,
        detail: String,
    },
    /// A point layout the decoder cannot handle.
    UnsupportedLayout { decoder: &'static str, layout: String },
    /// Child index outside `0..8`.
    IndexOutOfBounds { index: usize, len: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { expected, actual } => {
                write!(
                    f,
                    "buffer too small: expected {expected} bytes, got {actual}"
                )
            }
            Self::MisalignedBuffer { len, record_size } => {
                write!(
                    f,
                    "buffer of {len} bytes is not a multiple of the {record_size}-byte record size"
                )
            }
            Self::InvalidFormat { context, detail } => {
                write!(f, "invalid format in {context}: {detail}")
            }
            Self::UnsupportedLayout { decoder, layout } => {
                write!(f, "{decoder} cannot decode {layout} point layout")
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

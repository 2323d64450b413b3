//! Decoder error types.

use thiserror::Error;

/// Errors raised while opening a GRIB2 stream or reading one of its messages.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("failed to parse GRIB2 stream: {0}")]
    Parse(String),

    #[error("message index {index} out of range ({count} messages)")]
    MessageOutOfRange { index: usize, count: usize },

    #[error("failed to decode values of message {index}: {reason}")]
    Values { index: usize, reason: String },

    #[error("failed to read grid of message {index}: {reason}")]
    Grid { index: usize, reason: String },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

//! # Error Types
//!
//! Errors raised while moving verification payloads across the broker.

use thiserror::Error;

/// Errors that can occur when encoding or decoding wire payloads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    /// Payload could not be serialized.
    #[error("Encode failed: {0}")]
    Encode(String),

    /// Payload bytes did not decode into the expected message.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Correlation id does not fit in 63 bits.
    #[error("Correlation id out of range: {0:#x}")]
    CorrelationIdOutOfRange(u64),
}

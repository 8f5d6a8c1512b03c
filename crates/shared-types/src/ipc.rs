//! # Verification Wire Payloads
//!
//! Request and response messages exchanged over the broker, plus the queue
//! naming convention both sides agree on.
//!
//! ## Design Rules
//!
//! - Requests name their `reply_to` queue; workers never guess it.
//! - Responses echo the request's `correlation_id` and nothing else that
//!   identifies the requestor.
//! - A response with `failure == None` is a successful verification.

use crate::entities::Transaction;
use crate::errors::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known name of the shared queue every worker consumes.
pub const REQUEST_QUEUE: &str = "verifier.requests";

/// Prefix of the per-requestor response queues.
pub const RESPONSE_QUEUE_PREFIX: &str = "verifier.responses";

/// Name of the verification queue a node consumes internally.
pub const NODE_INTERNAL_QUEUE: &str = "internal.verifier.requests";

/// Largest value a correlation id may take (63 bits).
pub const MAX_CORRELATION_ID: u64 = (1 << 63) - 1;

/// Build the response queue name for a requestor instance.
pub fn response_queue_name(nonce: u64) -> String {
    format!("{RESPONSE_QUEUE_PREFIX}.{nonce:016x}")
}

/// Request-scoped identifier matching a response to its request.
///
/// Always fits in 63 bits; decoding a wider value fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Create from a raw value, rejecting anything wider than 63 bits.
    pub fn new(raw: u64) -> Result<Self, WireError> {
        if raw > MAX_CORRELATION_ID {
            return Err(WireError::CorrelationIdOutOfRange(raw));
        }
        Ok(Self(raw))
    }

    /// Create from arbitrary bits by clearing the top bit.
    pub fn from_bits(bits: u64) -> Self {
        Self(bits & MAX_CORRELATION_ID)
    }

    /// The raw 63-bit value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for CorrelationId {
    type Error = WireError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<CorrelationId> for u64 {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A transaction submitted to the worker pool for validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Identifier the response must echo.
    pub correlation_id: CorrelationId,
    /// The verification unit.
    pub transaction: Transaction,
    /// Queue the worker sends its response to.
    pub reply_to: String,
}

impl VerificationRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
    }
}

/// A worker's verdict on one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResponse {
    /// Identifier copied from the request.
    pub correlation_id: CorrelationId,
    /// Why the transaction was rejected; `None` means it verified.
    pub failure: Option<String>,
}

impl VerificationResponse {
    pub fn verified(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            failure: None,
        }
    }

    pub fn rejected(correlation_id: CorrelationId, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            failure: Some(reason.into()),
        }
    }

    pub fn outcome(&self) -> VerificationOutcome {
        VerificationOutcome::from(self.failure.clone())
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
    }
}

/// Domain-level result of a completed verification exchange.
///
/// `Rejected` is still a successful protocol exchange: the worker ran and
/// found the transaction invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Rejected(String),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }

    /// The failure description, if any.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Verified => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}

impl From<Option<String>> for VerificationOutcome {
    fn from(failure: Option<String>) -> Self {
        match failure {
            None => Self::Verified,
            Some(reason) => Self::Rejected(reason),
        }
    }
}

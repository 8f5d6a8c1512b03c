//! Random identifiers for requests and response queues.
//!
//! Correlation ids are drawn uniformly from the 63-bit space rather than
//! counted, so ids from independent requestors sharing a worker pool do not
//! line up.

use rand::Rng;
use shared_types::CorrelationId;

/// Draw a fresh correlation id.
pub fn random_correlation_id() -> CorrelationId {
    CorrelationId::from_bits(rand::thread_rng().gen())
}

/// Draw a nonce for a response queue name.
pub fn random_queue_nonce() -> u64 {
    rand::thread_rng().gen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::MAX_CORRELATION_ID;
    use std::collections::HashSet;

    #[test]
    fn test_ids_fit_in_63_bits() {
        for _ in 0..1_000 {
            assert!(random_correlation_id().value() <= MAX_CORRELATION_ID);
        }
    }

    #[test]
    fn test_ids_are_not_sequential() {
        let ids: HashSet<u64> = (0..1_000).map(|_| random_correlation_id().value()).collect();
        assert_eq!(ids.len(), 1_000);
    }
}

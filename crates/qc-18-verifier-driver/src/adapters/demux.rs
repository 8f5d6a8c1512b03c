//! # Response Demultiplexer
//!
//! Consumer callback on a requestor's private response queue. Runs on the
//! broker's delivery task and does no more than decode, look up and
//! resolve.

use crate::domain::{CorrelationRegistry, Resolution};
use quantum_telemetry::{
    VERIFICATION_IN_FLIGHT, VERIFICATION_OUTCOMES, VERIFICATION_RESPONSES,
    VERIFICATION_ROUND_TRIP,
};
use shared_bus::{Message, MessageHandler};
use shared_types::{VerificationResponse, WireError};
use std::sync::Arc;
use tracing::warn;

/// Routes responses to the completion handles waiting for them.
pub struct ResponseDemultiplexer {
    registry: Arc<CorrelationRegistry>,
}

impl ResponseDemultiplexer {
    pub fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self { registry }
    }

    /// Handle one delivered response.
    ///
    /// Unmatched and undecodable responses are logged, counted and dropped.
    pub fn on_message(&self, message: &Message) -> Result<Resolution, WireError> {
        let response = match VerificationResponse::decode(&message.body) {
            Ok(response) => response,
            Err(e) => {
                VERIFICATION_RESPONSES
                    .with_label_values(&["undecodable"])
                    .inc();
                warn!(
                    queue = %message.queue,
                    bytes = message.body.len(),
                    error = %e,
                    "Dropping undecodable verification response"
                );
                return Err(e);
            }
        };

        let outcome = response.outcome();
        let label = if outcome.is_verified() {
            "verified"
        } else {
            "rejected"
        };

        let resolution = self.registry.resolve(response.correlation_id, outcome);
        match resolution {
            Resolution::Delivered { round_trip } => {
                VERIFICATION_RESPONSES.with_label_values(&["matched"]).inc();
                VERIFICATION_OUTCOMES.with_label_values(&[label]).inc();
                VERIFICATION_ROUND_TRIP.observe(round_trip.as_secs_f64());
            }
            Resolution::Abandoned => {
                VERIFICATION_RESPONSES.with_label_values(&["matched"]).inc();
            }
            Resolution::Unmatched => {
                VERIFICATION_RESPONSES
                    .with_label_values(&["unmatched"])
                    .inc();
            }
        }
        VERIFICATION_IN_FLIGHT.set(self.registry.len() as f64);

        Ok(resolution)
    }

    /// Wrap as a broker consumer callback.
    pub fn into_handler(self: Arc<Self>) -> MessageHandler {
        Arc::new(move |message: Message| {
            let _ = self.on_message(&message);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{CorrelationId, VerificationOutcome};

    fn message(response: &VerificationResponse) -> Message {
        Message {
            queue: "verifier.responses.test".to_string(),
            body: response.encode().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_matched_response_resolves_handle() {
        let registry = Arc::new(CorrelationRegistry::new());
        let demux = ResponseDemultiplexer::new(Arc::clone(&registry));
        let id = CorrelationId::new(42).unwrap();
        let handle = registry.register(id).unwrap();

        let resolution = demux
            .on_message(&message(&VerificationResponse::rejected(id, "bad signature")))
            .unwrap();

        assert!(matches!(resolution, Resolution::Delivered { .. }));
        assert_eq!(
            handle.await.unwrap(),
            VerificationOutcome::Rejected("bad signature".into())
        );
    }

    #[test]
    fn test_duplicate_response_is_unmatched() {
        let registry = Arc::new(CorrelationRegistry::new());
        let demux = ResponseDemultiplexer::new(Arc::clone(&registry));
        let id = CorrelationId::new(8).unwrap();
        let _handle = registry.register(id).unwrap();
        let response = message(&VerificationResponse::verified(id));

        let before = VERIFICATION_RESPONSES
            .with_label_values(&["unmatched"])
            .get();
        demux.on_message(&response).unwrap();
        assert_eq!(demux.on_message(&response).unwrap(), Resolution::Unmatched);
        assert!(
            VERIFICATION_RESPONSES
                .with_label_values(&["unmatched"])
                .get()
                > before
        );
    }

    #[test]
    fn test_undecodable_response_dropped() {
        let registry = Arc::new(CorrelationRegistry::new());
        let demux = ResponseDemultiplexer::new(Arc::clone(&registry));
        let garbage = Message {
            queue: "q".to_string(),
            body: vec![0xde, 0xad],
        };
        assert!(demux.on_message(&garbage).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_handler_invokes_demux() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handler = Arc::new(ResponseDemultiplexer::new(Arc::clone(&registry))).into_handler();
        let id = CorrelationId::new(5).unwrap();
        let handle = registry.register(id).unwrap();

        handler(message(&VerificationResponse::verified(id)));

        assert!(handle.await.unwrap().is_verified());
    }
}

//! # Verification Requestor
//!
//! Application service implementing [`VerificationApi`] on top of a broker
//! session: a producer bound to the shared request queue, a consumer on the
//! requestor's private response queue and the correlation registry linking
//! the two.
//!
//! ## Submit Flow
//!
//! ```text
//! submit(tx) ─→ register(id) ─→ encode ─→ send(verifier.requests)
//!     │                                         │
//!     └── CompletionHandle ◄── resolve(id) ◄── demux ◄── verifier.responses.<nonce>
//! ```
//!
//! The registry entry exists before the request leaves, and is rolled back
//! if the request never does.

use crate::adapters::ResponseDemultiplexer;
use crate::domain::{random_correlation_id, CompletionHandle, CorrelationRegistry, DriverError};
use crate::ports::VerificationApi;
use async_trait::async_trait;
use quantum_telemetry::{VERIFICATION_IN_FLIGHT, VERIFICATION_REQUESTS_SENT, VERIFICATION_ROLLBACKS};
use shared_bus::{BrokerSession, ConsumerHandle, Producer};
use shared_types::{CorrelationId, Transaction, VerificationRequest, REQUEST_QUEUE};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Removes a registration unless the request was sent.
struct Registration<'a> {
    registry: &'a CorrelationRegistry,
    correlation_id: CorrelationId,
    armed: bool,
}

impl Registration<'_> {
    fn sent(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed && self.registry.remove(self.correlation_id) {
            VERIFICATION_ROLLBACKS.inc();
            VERIFICATION_IN_FLIGHT.set(self.registry.len() as f64);
            debug!(correlation_id = %self.correlation_id, "Registration rolled back");
        }
    }
}

/// Requestor-side endpoint of the verification protocol.
pub struct RequestorEndpoint {
    session: Arc<dyn BrokerSession>,
    producer: Producer,
    consumer: ConsumerHandle,
    response_queue: String,
    registry: Arc<CorrelationRegistry>,
}

impl RequestorEndpoint {
    /// Start consuming `response_queue` and bind a producer to the request
    /// queue. Both queues must already exist.
    pub async fn attach(
        session: Arc<dyn BrokerSession>,
        response_queue: impl Into<String>,
    ) -> Result<Self, DriverError> {
        let response_queue = response_queue.into();
        let registry = Arc::new(CorrelationRegistry::new());
        let demux = Arc::new(ResponseDemultiplexer::new(Arc::clone(&registry)));

        let consumer = session
            .consume(&response_queue, demux.into_handler())
            .await?;
        let producer = Producer::new(Arc::clone(&session), REQUEST_QUEUE);

        info!(response_queue = %response_queue, "Verification requestor attached");

        Ok(Self {
            session,
            producer,
            consumer,
            response_queue,
            registry,
        })
    }

    /// Queue responses for this requestor arrive on.
    pub fn response_queue(&self) -> &str {
        &self.response_queue
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &Arc<dyn BrokerSession> {
        &self.session
    }

    /// Requests sent so far.
    pub fn requests_sent(&self) -> u64 {
        self.producer.messages_sent()
    }

    /// Detach the response consumer and close the session.
    ///
    /// Requests still in flight stay registered; their handles never
    /// resolve unless the caller drops them.
    pub async fn close(&self) {
        self.consumer.close();
        self.session.close().await;
        if !self.registry.is_empty() {
            warn!(
                in_flight = self.registry.len(),
                "Requestor closed with verifications in flight"
            );
        }
    }

    fn register(&self) -> (CompletionHandle, Registration<'_>) {
        loop {
            let correlation_id = random_correlation_id();
            if let Some(handle) = self.registry.register(correlation_id) {
                let registration = Registration {
                    registry: &self.registry,
                    correlation_id,
                    armed: true,
                };
                return (handle, registration);
            }
        }
    }
}

#[async_trait]
impl VerificationApi for RequestorEndpoint {
    async fn submit(&self, transaction: Transaction) -> Result<CompletionHandle, DriverError> {
        let (handle, registration) = self.register();
        let correlation_id = handle.correlation_id();

        let request = VerificationRequest {
            correlation_id,
            transaction,
            reply_to: self.response_queue.clone(),
        };
        let body = request.encode()?;
        self.producer.send(body).await?;

        registration.sent();
        VERIFICATION_REQUESTS_SENT.inc();
        VERIFICATION_IN_FLIGHT.set(self.registry.len() as f64);
        debug!(correlation_id = %correlation_id, "Verification request sent");

        Ok(handle)
    }

    fn in_flight(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HandleError;
    use shared_bus::{BusError, EmbeddedBroker, LocalSession, Message, MessageHandler};
    use shared_types::{response_queue_name, VerificationResponse};
    use std::sync::atomic::Ordering;

    fn transaction(value: u64) -> Transaction {
        Transaction {
            from: [1u8; 32],
            to: Some([2u8; 32]),
            value,
            nonce: 0,
            data: vec![],
            signature: [0u8; 64],
        }
    }

    async fn endpoint(broker: &EmbeddedBroker) -> RequestorEndpoint {
        let queue = response_queue_name(1);
        broker.create_queue(REQUEST_QUEUE, false).unwrap();
        broker.create_queue(&queue, false).unwrap();
        RequestorEndpoint::attach(Arc::new(LocalSession::new(broker.clone())), queue)
            .await
            .unwrap()
    }

    /// Echo worker answering every request on the broker directly.
    fn echo_worker(broker: &EmbeddedBroker) -> shared_bus::ConsumerHandle {
        let replies = broker.clone();
        let handler: MessageHandler = Arc::new(move |message: Message| {
            let request = VerificationRequest::decode(&message.body).unwrap();
            let response = if request.transaction.value > 0 {
                VerificationResponse::verified(request.correlation_id)
            } else {
                VerificationResponse::rejected(request.correlation_id, "zero value")
            };
            replies
                .send(&request.reply_to, response.encode().unwrap())
                .unwrap();
        });
        broker.consume(REQUEST_QUEUE, handler).unwrap()
    }

    #[tokio::test]
    async fn test_submit_round_trip() {
        let broker = EmbeddedBroker::new("test");
        let endpoint = endpoint(&broker).await;
        let _worker = echo_worker(&broker);

        let good = endpoint.submit(transaction(5)).await.unwrap();
        let bad = endpoint.submit(transaction(0)).await.unwrap();

        assert!(good.await.unwrap().is_verified());
        assert_eq!(bad.await.unwrap().failure(), Some("zero value"));
        assert_eq!(endpoint.in_flight(), 0);
        assert_eq!(endpoint.requests_sent(), 2);
    }

    #[tokio::test]
    async fn test_send_failure_rolls_back() {
        let broker = EmbeddedBroker::new("test");
        let endpoint = endpoint(&broker).await;
        endpoint.session().close().await;

        let result = endpoint.submit(transaction(1)).await;

        assert!(matches!(
            result,
            Err(DriverError::Bus(BusError::SessionClosed))
        ));
        assert_eq!(endpoint.in_flight(), 0);
        let stats = endpoint.registry().stats();
        assert_eq!(stats.total_removed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_request_carries_reply_queue() {
        let broker = EmbeddedBroker::new("test");
        let endpoint = endpoint(&broker).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _spy = broker
            .consume(
                REQUEST_QUEUE,
                Arc::new(move |m: Message| {
                    let _ = tx.send(VerificationRequest::decode(&m.body).unwrap());
                }),
            )
            .unwrap();

        let handle = endpoint.submit(transaction(3)).await.unwrap();
        let request = rx.recv().await.unwrap();

        assert_eq!(request.correlation_id, handle.correlation_id());
        assert_eq!(request.reply_to, endpoint.response_queue());
        assert!(endpoint.registry().is_pending(handle.correlation_id()));
    }

    #[tokio::test]
    async fn test_dropping_registry_entry_abandons_handle() {
        let broker = EmbeddedBroker::new("test");
        let endpoint = endpoint(&broker).await;

        let handle = endpoint.submit(transaction(3)).await.unwrap();
        endpoint.registry().remove(handle.correlation_id());

        assert_eq!(handle.await, Err(HandleError::Abandoned));
    }
}

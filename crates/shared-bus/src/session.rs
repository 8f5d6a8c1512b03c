//! # Broker Sessions
//!
//! The client-facing view of a broker. Requestors and workers program
//! against [`BrokerSession`] and do not care whether the broker lives in
//! their own process ([`LocalSession`]) or across a socket
//! ([`RemoteSession`](crate::transport::RemoteSession)).

use crate::broker::EmbeddedBroker;
use crate::subscriber::ConsumerHandle;
use crate::{BusError, MessageHandler};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Operations a client may perform against a broker.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Create a queue. Returns `false` if it already existed.
    async fn create_queue(&self, name: &str, durable: bool) -> Result<bool, BusError>;

    /// Send a message to a queue.
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BusError>;

    /// Attach a consumer whose callback runs on a broker-owned task.
    async fn consume(&self, queue: &str, handler: MessageHandler)
        -> Result<ConsumerHandle, BusError>;

    /// Number of consumers currently attached to a queue.
    async fn consumer_count(&self, queue: &str) -> Result<usize, BusError>;

    /// Stop the session. Later operations fail with [`BusError::SessionClosed`].
    async fn close(&self);
}

/// Session on a broker in the same process.
pub struct LocalSession {
    broker: EmbeddedBroker,
    closed: AtomicBool,
}

impl LocalSession {
    #[must_use]
    pub fn new(broker: EmbeddedBroker) -> Self {
        Self {
            broker,
            closed: AtomicBool::new(false),
        }
    }

    /// The broker this session talks to.
    #[must_use]
    pub fn broker(&self) -> &EmbeddedBroker {
        &self.broker
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerSession for LocalSession {
    async fn create_queue(&self, name: &str, durable: bool) -> Result<bool, BusError> {
        self.ensure_open()?;
        self.broker.create_queue(name, durable)
    }

    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BusError> {
        self.ensure_open()?;
        self.broker.send(queue, body)
    }

    async fn consume(
        &self,
        queue: &str,
        handler: MessageHandler,
    ) -> Result<ConsumerHandle, BusError> {
        self.ensure_open()?;
        self.broker.consume(queue, handler)
    }

    async fn consumer_count(&self, queue: &str) -> Result<usize, BusError> {
        self.ensure_open()?;
        self.broker.consumer_count(queue)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(broker = %self.broker.name(), "Local session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_local_session_roundtrip() {
        let broker = EmbeddedBroker::new("test");
        let session = LocalSession::new(broker.clone());
        assert!(session.create_queue("q", false).await.unwrap());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _consumer = session
            .consume(
                "q",
                Arc::new(move |m| {
                    let _ = tx.send(m.body);
                }),
            )
            .await
            .unwrap();
        assert_eq!(session.consumer_count("q").await.unwrap(), 1);

        session.send("q", vec![4, 2]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), vec![4, 2]);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let session = LocalSession::new(EmbeddedBroker::new("test"));
        session.create_queue("q", false).await.unwrap();
        session.close().await;

        assert_eq!(
            session.send("q", vec![]).await,
            Err(BusError::SessionClosed)
        );
        assert_eq!(
            session.consumer_count("q").await,
            Err(BusError::SessionClosed)
        );
        // The broker itself is untouched.
        assert!(session.broker().is_running());
    }
}

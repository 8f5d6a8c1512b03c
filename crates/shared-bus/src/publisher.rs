//! # Producers
//!
//! A producer is a session bound to one destination queue.

use crate::session::BrokerSession;
use crate::BusError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends messages to a fixed queue.
pub struct Producer {
    /// The session messages go through.
    session: Arc<dyn BrokerSession>,

    /// Destination queue.
    address: String,

    /// Messages successfully handed to the broker.
    messages_sent: AtomicU64,
}

impl Producer {
    #[must_use]
    pub fn new(session: Arc<dyn BrokerSession>, address: impl Into<String>) -> Self {
        Self {
            session,
            address: address.into(),
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Destination queue.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a message to the bound queue.
    pub async fn send(&self, body: Vec<u8>) -> Result<(), BusError> {
        let size = body.len();
        match self.session.send(&self.address, body).await {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                debug!(queue = %self.address, bytes = size, "Message sent");
                Ok(())
            }
            Err(e) => {
                warn!(queue = %self.address, error = %e, "Send failed");
                Err(e)
            }
        }
    }

    /// Messages successfully sent so far.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

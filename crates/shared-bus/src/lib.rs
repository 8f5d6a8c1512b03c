//! # Shared Bus - Message Broker for Verifier Traffic
//!
//! A small point-to-point broker carrying verification requests from a
//! requestor to out-of-process workers, and responses back.
//!
//! ## Topology
//!
//! ```text
//! ┌──────────────┐   send(verifier.requests)   ┌──────────────┐
//! │  Requestor   │ ──────────────┐             │   Worker N   │
//! │ (LocalSession)│              ▼             │(RemoteSession)│
//! └──────────────┘       ┌──────────────┐      └──────────────┘
//!        ↑               │EmbeddedBroker│◄── BrokerAcceptor (TCP)
//!        └────────────── │   queues     │ ◄──────────┘
//!   consume(responses.*) └──────────────┘  send(reply_to)
//! ```
//!
//! ## Semantics
//!
//! - Queues are point-to-point with competing consumers.
//! - Delivery is best-effort and non-durable; a stopped broker drops
//!   everything it holds.
//! - Consumer callbacks run on a broker-owned task, one per consumer.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod publisher;
pub mod security;
pub mod session;
pub mod subscriber;
pub mod transport;

use std::sync::Arc;
use thiserror::Error;

// Re-export main types
pub use broker::EmbeddedBroker;
pub use publisher::Producer;
pub use security::{ConnectionInfo, PermissiveSecurityManager, SecurityManager};
pub use session::{BrokerSession, LocalSession};
pub use subscriber::ConsumerHandle;
pub use transport::{BrokerAcceptor, RemoteSession, TlsSettings, TransportConfig};

/// Current wire protocol version for remote sessions.
pub const PROTOCOL_VERSION: u16 = 1;

/// Largest frame accepted on a remote connection.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A message taken off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Queue the message was delivered from.
    pub queue: String,
    /// Opaque payload.
    pub body: Vec<u8>,
}

/// Callback invoked for every message delivered to a consumer.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Errors from broker and session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The named queue does not exist.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// The broker has been stopped.
    #[error("Broker stopped")]
    BrokerStopped,

    /// The session was closed by its owner.
    #[error("Session closed")]
    SessionClosed,

    /// The remote connection went away.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// A frame could not be encoded or decoded.
    #[error("Frame error: {0}")]
    Frame(String),

    /// A frame exceeded [`MAX_FRAME_SIZE`].
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The remote broker refused an operation.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The security manager refused the connection.
    #[error("Connection not authorized")]
    Unauthorized,
}

impl From<std::io::Error> for BusError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

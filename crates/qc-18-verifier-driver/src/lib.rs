//! QC-18 Verifier Driver - out-of-process transaction verification.
//!
//! Offloads transaction validation to `qc-verifier` worker processes over a
//! message broker, matching responses to requests by correlation id.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── requestor process ─────────────────────────────┐
//! │                                                                            │
//! │  submit(tx) ──→ CorrelationRegistry ──→ Producer ──→ verifier.requests ──┐ │
//! │       │               ▲                                                   │ │
//! │       ▼               │ resolve(id)                     EmbeddedBroker    │ │
//! │  CompletionHandle  ResponseDemultiplexer ◄── verifier.responses.<nonce> ◄┐│ │
//! │                                                           ▲ BrokerAcceptor│ │
//! └───────────────────────────────────────────────────────────┼──────────────┼─┘
//!                                                  TCP frames │              │
//!                    ┌────────────────────────────────────────┴──────────────▼─┐
//!                    │  qc-verifier (one process per worker, many per pool)     │
//!                    │  consume → validate → send(reply_to)                     │
//!                    └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! [`VerifierDriver`] provisions the requestor, launches workers through the
//! [`WorkerOrchestrator`], blocks on the [`ReadinessPoller`] until they
//! attach, and releases everything through the [`ShutdownManager`] in
//! reverse order.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod driver;
pub mod orchestrator;
pub mod ports;
pub mod provisioner;
pub mod readiness;
pub mod service;
pub mod shutdown;
pub mod worker;

pub use adapters::ResponseDemultiplexer;
pub use domain::{
    CompletionHandle, CorrelationRegistry, DriverConfig, DriverError, HandleError, IdentityError,
    Resolution, WorkerConfig,
};
pub use driver::{verifier_driver, VerifierDriver};
pub use orchestrator::{DebugPortAllocation, WorkerHandle, WorkerOrchestrator};
pub use ports::VerificationApi;
pub use provisioner::{provision_requestor, VerificationRequestor};
pub use readiness::ReadinessPoller;
pub use service::RequestorEndpoint;
pub use shutdown::ShutdownManager;
pub use worker::{
    sign_transaction, TransactionValidator, ValidationError, VerifierWorker, DEBUG_PORT_ENV,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

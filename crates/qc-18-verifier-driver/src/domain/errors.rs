//! # Driver Errors
//!
//! Error types for the requestor side, worker orchestration and identity
//! provisioning.

use shared_bus::BusError;
use shared_types::WireError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the verification driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Broker or transport failure.
    #[error("Broker error: {0}")]
    Bus(#[from] BusError),

    /// A payload could not be encoded or decoded.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// The consumer count never reached its target.
    #[error(
        "Timed out after {waited:?} waiting for {target} consumer(s) on {queue} (last observed {observed})"
    )]
    ReadinessTimeout {
        queue: String,
        target: usize,
        observed: usize,
        waited: Duration,
    },

    /// The worker process could not be launched.
    #[error("Failed to start verifier worker {ordinal}: {reason}")]
    WorkerSpawn { ordinal: u32, reason: String },

    /// The launch task panicked or was cancelled before reporting back.
    #[error("Worker launch task did not complete: {0}")]
    LaunchAborted(String),

    /// Configuration could not be read or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity material could not be provisioned or verified.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The shutdown sequence has already run.
    #[error("Driver has already shut down")]
    ShutDown,
}

/// Why a completion handle resolved without an outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The registry entry was removed before any response arrived.
    #[error("Verification abandoned before a response arrived")]
    Abandoned,
}

/// Identity provisioning and verification errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Malformed identity file {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Certificate is not signed by the trusted root")]
    UntrustedCertificate,

    #[error("Identity key does not match the certificate")]
    KeyMismatch,

    #[error("Invalid key material")]
    InvalidKey,
}

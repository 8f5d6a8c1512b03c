//! # Inbound Ports (Driving Ports / API)

use crate::domain::{CompletionHandle, DriverError};
use async_trait::async_trait;
use shared_types::Transaction;

/// Submit transactions for out-of-process verification.
///
/// `submit` returns once the request is on the broker. The verdict arrives
/// later through the returned handle.
#[async_trait]
pub trait VerificationApi: Send + Sync {
    /// Send `transaction` to the worker pool.
    ///
    /// # Errors
    /// Fails without leaving a registry entry behind if the request could
    /// not be encoded or sent.
    async fn submit(&self, transaction: Transaction) -> Result<CompletionHandle, DriverError>;

    /// Requests waiting for a response.
    fn in_flight(&self) -> usize;
}

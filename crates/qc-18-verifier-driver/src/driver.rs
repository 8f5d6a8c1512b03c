//! # Verifier Driver
//!
//! Test/operations DSL tying the pieces together: provision a requestor,
//! launch workers against it, wait for them to attach, and tear
//! everything down in order.
//!
//! ```rust,ignore
//! verifier_driver(DriverConfig::from_env(), |driver| async move {
//!     let requestor = driver.start_verification_requestor(&TransportConfig::default()).await?;
//!     driver.start_worker(requestor.address()).await?;
//!     driver.wait_until_worker_count(&requestor, 1).await?;
//!
//!     let verdict = requestor.submit(tx).await?.await?;
//!     Ok(verdict)
//! })
//! .await
//! ```

use crate::domain::{DriverConfig, DriverError};
use crate::orchestrator::{WorkerHandle, WorkerOrchestrator};
use crate::provisioner::{provision_requestor, VerificationRequestor};
use crate::readiness::{bounded, timed_out, ReadinessPoller};
use crate::shutdown::ShutdownManager;
use shared_bus::{BrokerSession, RemoteSession, TransportConfig};
use shared_types::{NODE_INTERNAL_QUEUE, REQUEST_QUEUE};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct VerifierDriver {
    config: Arc<DriverConfig>,
    shutdown: Arc<ShutdownManager>,
    orchestrator: WorkerOrchestrator,
    poller: ReadinessPoller,
}

impl VerifierDriver {
    pub fn new(config: DriverConfig) -> Self {
        let config = Arc::new(config);
        let shutdown = Arc::new(ShutdownManager::new());
        let orchestrator = WorkerOrchestrator::new(Arc::clone(&config), Arc::clone(&shutdown));
        let poller = ReadinessPoller::new(config.retry_interval);
        Self {
            config,
            shutdown,
            orchestrator,
            poller,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn shutdown_manager(&self) -> &Arc<ShutdownManager> {
        &self.shutdown
    }

    /// Provision an embedded broker and requestor endpoint listening on
    /// `address`.
    pub async fn start_verification_requestor(
        &self,
        address: &TransportConfig,
    ) -> Result<VerificationRequestor, DriverError> {
        provision_requestor(address, &self.shutdown).await
    }

    /// Launch a worker consuming from the broker at `request_address`.
    pub fn start_worker(
        &self,
        request_address: impl Into<String>,
    ) -> impl Future<Output = Result<WorkerHandle, DriverError>> + Send + 'static {
        self.orchestrator.start_worker(request_address)
    }

    /// Wait until `count` workers consume `requestor`'s request queue.
    pub async fn wait_until_worker_count(
        &self,
        requestor: &VerificationRequestor,
        count: usize,
    ) -> Result<usize, DriverError> {
        self.poller
            .wait_for_consumer_count(
                requestor.session().as_ref(),
                REQUEST_QUEUE,
                count,
                self.config.readiness_timeout,
            )
            .await
    }

    /// Connect to a node's broker and wait until its internal verification
    /// queue has a consumer.
    ///
    /// The connect and the wait share one deadline.
    pub async fn wait_for_node_internal_queue(
        &self,
        node_address: &TransportConfig,
    ) -> Result<usize, DriverError> {
        let started = Instant::now();
        let deadline = started.checked_add(self.config.readiness_timeout);
        let session = match bounded(deadline, RemoteSession::connect(node_address)).await {
            Some(session) => session?,
            None => return Err(timed_out(NODE_INTERNAL_QUEUE, 1, 0, started)),
        };
        let remaining = deadline.map_or(self.config.readiness_timeout, |deadline| {
            deadline.saturating_duration_since(Instant::now())
        });
        let result = self
            .poller
            .wait_for_consumer_count(&session, NODE_INTERNAL_QUEUE, 1, remaining)
            .await;
        session.close().await;
        result
    }

    /// Run the shutdown sequence.
    pub async fn shutdown(&self) {
        let released = self.shutdown.shutdown().await;
        info!(released, "Verifier driver shut down");
    }
}

/// Run `body` with a fresh driver, then always run the shutdown sequence.
///
/// Returns whatever `body` returned.
pub async fn verifier_driver<F, Fut, T>(config: DriverConfig, body: F) -> Result<T, DriverError>
where
    F: FnOnce(Arc<VerifierDriver>) -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let driver = Arc::new(VerifierDriver::new(config));
    let result = body(Arc::clone(&driver)).await;
    if let Err(e) = &result {
        warn!(error = %e, "Driver scenario failed");
    }
    driver.shutdown().await;
    result
}

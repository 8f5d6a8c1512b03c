//! # Broker Endpoint Provisioning
//!
//! Stands up the requestor side: an embedded broker holding the shared
//! request queue and this requestor's private response queue, a TCP
//! acceptor for workers, and the [`RequestorEndpoint`] on top.
//!
//! ## Teardown Order
//!
//! Registered so the shutdown sequence runs: response consumer and session,
//! then acceptor, then broker.
//!
//! ## Security
//!
//! The acceptor uses [`PermissiveSecurityManager`]. Peers are authenticated
//! by the mutual-TLS handshake in front of the acceptor, so every
//! connection that reaches it is trusted.

use crate::domain::{random_queue_nonce, CompletionHandle, DriverError};
use crate::ports::VerificationApi;
use crate::service::RequestorEndpoint;
use crate::shutdown::ShutdownManager;
use async_trait::async_trait;
use shared_bus::{
    BrokerAcceptor, BrokerSession, EmbeddedBroker, LocalSession, PermissiveSecurityManager,
    TransportConfig,
};
use shared_types::{response_queue_name, Transaction, REQUEST_QUEUE};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// A provisioned requestor: embedded broker, acceptor and endpoint.
pub struct VerificationRequestor {
    endpoint: Arc<RequestorEndpoint>,
    broker: EmbeddedBroker,
    local_addr: SocketAddr,
}

impl VerificationRequestor {
    /// `host:port` workers connect to.
    pub fn address(&self) -> String {
        self.local_addr.to_string()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn endpoint(&self) -> &Arc<RequestorEndpoint> {
        &self.endpoint
    }

    pub fn session(&self) -> &Arc<dyn BrokerSession> {
        self.endpoint.session()
    }

    pub fn broker(&self) -> &EmbeddedBroker {
        &self.broker
    }

    pub fn response_queue(&self) -> &str {
        self.endpoint.response_queue()
    }
}

#[async_trait]
impl VerificationApi for VerificationRequestor {
    async fn submit(&self, transaction: Transaction) -> Result<CompletionHandle, DriverError> {
        self.endpoint.submit(transaction).await
    }

    fn in_flight(&self) -> usize {
        self.endpoint.in_flight()
    }
}

/// Provision a requestor listening on `transport` and register its teardown
/// with `shutdown`.
pub async fn provision_requestor(
    transport: &TransportConfig,
    shutdown: &ShutdownManager,
) -> Result<VerificationRequestor, DriverError> {
    let nonce = random_queue_nonce();
    let response_queue = response_queue_name(nonce);
    let broker = EmbeddedBroker::new(format!("verifier-requestor-{nonce:016x}"));
    broker.create_queue(REQUEST_QUEUE, false)?;
    broker.create_queue(&response_queue, false)?;

    let stop_broker = broker.clone();
    shutdown.register("embedded-broker", move || async move {
        stop_broker.stop();
    })?;

    let acceptor = BrokerAcceptor::bind(
        broker.clone(),
        transport,
        Arc::new(PermissiveSecurityManager),
    )
    .await?;
    let local_addr = acceptor.local_addr();
    shutdown.register("broker-acceptor", move || async move {
        acceptor.stop();
    })?;

    let session: Arc<dyn BrokerSession> = Arc::new(LocalSession::new(broker.clone()));
    let endpoint = Arc::new(RequestorEndpoint::attach(session, response_queue).await?);
    let closing = Arc::clone(&endpoint);
    shutdown.register("requestor-endpoint", move || async move {
        closing.close().await;
    })?;

    info!(
        address = %local_addr,
        request_queue = REQUEST_QUEUE,
        response_queue = %endpoint.response_queue(),
        "Verification requestor provisioned"
    );

    Ok(VerificationRequestor {
        endpoint,
        broker,
        local_addr,
    })
}

//! # Verifier Worker
//!
//! The out-of-process side of the protocol, run by the `qc-verifier`
//! binary. Consumes the shared request queue, validates each transaction and
//! sends the verdict to the request's `reply_to` queue.
//!
//! Broker callbacks only enqueue; validation and replies happen on the
//! worker's own task so a slow reply never stalls delivery.

pub mod validation;

pub use validation::{sign_transaction, TransactionValidator, ValidationError};

use crate::domain::{DriverError, WorkerConfig, WorkerIdentity};
use quantum_telemetry::WORKER_TRANSACTIONS_CHECKED;
use shared_bus::{BrokerSession, BusError, Message};
use shared_types::{VerificationRequest, VerificationResponse, REQUEST_QUEUE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Environment variable carrying the worker's debug port.
pub const DEBUG_PORT_ENV: &str = "QC_VERIFIER_DEBUG_PORT";

/// Per-worker counters, also reported by the debug probe.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub verified: AtomicU64,
    pub rejected: AtomicU64,
    /// Requests that could not be decoded and got no reply.
    pub malformed: AtomicU64,
}

impl WorkerStats {
    fn status_line(&self, legal_name: &str) -> String {
        format!(
            "qc-verifier {legal_name} verified={} rejected={} malformed={}\n",
            self.verified.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.malformed.load(Ordering::Relaxed),
        )
    }
}

pub struct VerifierWorker {
    config: WorkerConfig,
    identity: WorkerIdentity,
    session: Arc<dyn BrokerSession>,
    validator: TransactionValidator,
    stats: Arc<WorkerStats>,
}

impl VerifierWorker {
    pub fn new(
        config: WorkerConfig,
        identity: WorkerIdentity,
        session: Arc<dyn BrokerSession>,
    ) -> Self {
        let validator = TransactionValidator::new(config.max_data_bytes);
        Self {
            config,
            identity,
            session,
            validator,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn legal_name(&self) -> &str {
        self.identity.legal_name()
    }

    /// Validate one request. Returns the reply queue and encoded response,
    /// or `None` if the request could not be decoded.
    pub fn handle_request(&self, body: &[u8]) -> Option<(String, Vec<u8>)> {
        let request = match VerificationRequest::decode(body) {
            Ok(request) => request,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, bytes = body.len(), "Dropping undecodable request");
                return None;
            }
        };

        let response = match self.validator.validate(&request.transaction) {
            Ok(()) => {
                self.stats.verified.fetch_add(1, Ordering::Relaxed);
                WORKER_TRANSACTIONS_CHECKED
                    .with_label_values(&["verified"])
                    .inc();
                VerificationResponse::verified(request.correlation_id)
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                WORKER_TRANSACTIONS_CHECKED
                    .with_label_values(&["rejected"])
                    .inc();
                VerificationResponse::rejected(request.correlation_id, e.to_string())
            }
        };
        debug!(
            correlation_id = %request.correlation_id,
            reply_to = %request.reply_to,
            verified = response.failure.is_none(),
            "Transaction checked"
        );

        match response.encode() {
            Ok(bytes) => Some((request.reply_to, bytes)),
            Err(e) => {
                warn!(correlation_id = %request.correlation_id, error = %e, "Failed to encode response");
                None
            }
        }
    }

    /// Consume requests until the broker goes away.
    pub async fn run(&self) -> Result<(), DriverError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let _consumer = self
            .session
            .consume(
                REQUEST_QUEUE,
                Arc::new(move |message: Message| {
                    let _ = tx.send(message);
                }),
            )
            .await?;

        info!(
            ordinal = self.config.ordinal,
            legal_name = %self.legal_name(),
            request_address = %self.config.request_address,
            "Verifier worker consuming requests"
        );

        while let Some(message) = rx.recv().await {
            let Some((reply_to, body)) = self.handle_request(&message.body) else {
                continue;
            };
            match self.session.send(&reply_to, body).await {
                Ok(()) => {}
                Err(e @ (BusError::ConnectionLost(_) | BusError::SessionClosed)) => {
                    return Err(e.into());
                }
                Err(e) => warn!(reply_to = %reply_to, error = %e, "Failed to send response"),
            }
        }

        info!(ordinal = self.config.ordinal, "Request stream ended");
        Ok(())
    }
}

/// Answer every connection on `listener` with a one-line status report.
pub async fn serve_debug_probe(
    listener: TcpListener,
    legal_name: String,
    stats: Arc<WorkerStats>,
) -> Result<(), DriverError> {
    info!(address = %listener.local_addr()?, "Debug probe listening");
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let line = stats.status_line(&legal_name);
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            debug!(peer = %peer, error = %e, "Debug probe write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{load_verified_identity, provision_dev_identity};
    use ed25519_dalek::SigningKey;
    use shared_bus::{EmbeddedBroker, LocalSession};
    use shared_types::{response_queue_name, CorrelationId, Transaction};
    use tokio::io::AsyncReadExt;

    fn worker(broker: &EmbeddedBroker, dir: &std::path::Path) -> VerifierWorker {
        provision_dev_identity(dir, "qc-verifier-test").unwrap();
        let identity = load_verified_identity(dir).unwrap();
        let config = WorkerConfig::new(0, dir.to_path_buf(), "127.0.0.1:0");
        VerifierWorker::new(config, identity, Arc::new(LocalSession::new(broker.clone())))
    }

    fn request(id: u64, value: u64) -> VerificationRequest {
        let mut transaction = Transaction {
            from: [0u8; 32],
            to: None,
            value,
            nonce: 0,
            data: vec![],
            signature: [0u8; 64],
        };
        sign_transaction(&mut transaction, &SigningKey::from_bytes(&[1u8; 32]));
        VerificationRequest {
            correlation_id: CorrelationId::new(id).unwrap(),
            transaction,
            reply_to: response_queue_name(3),
        }
    }

    #[test]
    fn test_handle_request_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(&EmbeddedBroker::new("test"), dir.path());

        let (reply_to, body) = worker
            .handle_request(&request(1, 10).encode().unwrap())
            .unwrap();
        assert_eq!(reply_to, response_queue_name(3));
        assert!(VerificationResponse::decode(&body).unwrap().failure.is_none());

        let (_, body) = worker
            .handle_request(&request(2, 0).encode().unwrap())
            .unwrap();
        let response = VerificationResponse::decode(&body).unwrap();
        assert_eq!(response.correlation_id.value(), 2);
        assert!(response.failure.is_some());

        assert!(worker.handle_request(&[0xff]).is_none());
        assert_eq!(worker.stats().verified.load(Ordering::Relaxed), 1);
        assert_eq!(worker.stats().rejected.load(Ordering::Relaxed), 1);
        assert_eq!(worker.stats().malformed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_run_replies_and_stops_with_broker() {
        let dir = tempfile::tempdir().unwrap();
        let broker = EmbeddedBroker::new("test");
        broker.create_queue(REQUEST_QUEUE, false).unwrap();
        broker.create_queue(&response_queue_name(3), false).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _responses = broker
            .consume(
                &response_queue_name(3),
                Arc::new(move |m: Message| {
                    let _ = tx.send(VerificationResponse::decode(&m.body).unwrap());
                }),
            )
            .unwrap();

        let worker = Arc::new(worker(&broker, dir.path()));
        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });

        while broker.consumer_count(REQUEST_QUEUE).unwrap() == 0 {
            tokio::task::yield_now().await;
        }
        broker
            .send(REQUEST_QUEUE, request(9, 4).encode().unwrap())
            .unwrap();

        let response = rx.recv().await.unwrap();
        assert_eq!(response.correlation_id.value(), 9);
        assert!(response.failure.is_none());

        broker.stop();
        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_debug_probe_reports_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let stats = Arc::new(WorkerStats::default());
        stats.verified.fetch_add(2, Ordering::Relaxed);
        let probe = tokio::spawn(serve_debug_probe(listener, "w0".to_string(), stats));

        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        let mut line = String::new();
        stream.read_to_string(&mut line).await.unwrap();

        assert_eq!(line, "qc-verifier w0 verified=2 rejected=0 malformed=0\n");
        probe.abort();
    }
}

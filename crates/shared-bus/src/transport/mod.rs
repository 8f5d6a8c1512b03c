//! # Remote Transport
//!
//! Exposes an [`EmbeddedBroker`](crate::EmbeddedBroker) to other processes
//! over TCP and provides the matching client session.
//!
//! ## Wire Format
//!
//! Every frame is a 4-byte big-endian length followed by a `bincode`
//! body. The client opens with `Hello { version }`; everything after is a
//! request carrying a `request_id` that the broker echoes in its `Ack` or
//! `Error`, or an asynchronous `Deliver` for an active subscription.

mod acceptor;
mod client;
mod frame;

pub use acceptor::BrokerAcceptor;
pub use client::RemoteSession;

use crate::BusError;
use serde::{Deserialize, Serialize};

/// Development keystore password used by every harness identity.
pub const DEV_KEYSTORE_PASSWORD: &str = "devkeystorepass";

/// Development truststore password used by every harness identity.
pub const DEV_TRUSTSTORE_PASSWORD: &str = "devtruststorepass";

/// Credentials presented during the mutual-TLS handshake.
///
/// Connections are always mutually authenticated by the transport, never by
/// username/password. Encryption itself is provided by the deployment's TLS
/// layer in front of the acceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    pub keystore_password: String,
    pub truststore_password: String,
}

impl TlsSettings {
    /// Whether these are the fixed development passwords.
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.keystore_password == DEV_KEYSTORE_PASSWORD
            && self.truststore_password == DEV_TRUSTSTORE_PASSWORD
    }
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            keystore_password: DEV_KEYSTORE_PASSWORD.to_string(),
            truststore_password: DEV_TRUSTSTORE_PASSWORD.to_string(),
        }
    }
}

/// Where a broker listens / where a client connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: TlsSettings,
}

impl TransportConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: TlsSettings::default(),
        }
    }

    /// Parse a `host:port` address.
    pub fn parse(address: &str) -> Result<Self, BusError> {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| BusError::Io(format!("address missing port: {address}")))?;
        let port = port
            .parse()
            .map_err(|_| BusError::Io(format!("invalid port in address: {address}")))?;
        if host.is_empty() {
            return Err(BusError::Io(format!("address missing host: {address}")));
        }
        Ok(Self::new(host, port))
    }

    /// `host:port` form.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::EmbeddedBroker;
    use crate::security::{ConnectionInfo, PermissiveSecurityManager, SecurityManager};
    use crate::session::BrokerSession;
    use crate::Message;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    async fn serve(broker: &EmbeddedBroker) -> BrokerAcceptor {
        BrokerAcceptor::bind(
            broker.clone(),
            &TransportConfig::default(),
            Arc::new(PermissiveSecurityManager),
        )
        .await
        .unwrap()
    }

    async fn wait_for_consumers(broker: &EmbeddedBroker, queue: &str, target: usize) {
        for _ in 0..100 {
            if broker.consumer_count(queue).unwrap() >= target {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("consumer never attached");
    }

    #[test]
    fn test_parse_address() {
        let config = TransportConfig::parse("localhost:10002").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 10002);
        assert_eq!(config.address(), "localhost:10002");
        assert!(config.tls.is_development());
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(TransportConfig::parse("localhost").is_err());
        assert!(TransportConfig::parse("localhost:port").is_err());
        assert!(TransportConfig::parse(":80").is_err());
    }

    #[tokio::test]
    async fn test_remote_send_reaches_local_consumer() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let acceptor = serve(&broker).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let _local = broker
            .consume(
                "q",
                Arc::new(move |m| {
                    let _ = tx.send(m);
                }),
            )
            .unwrap();

        let remote = RemoteSession::connect(&TransportConfig::new(
            "127.0.0.1",
            acceptor.local_addr().port(),
        ))
        .await
        .unwrap();
        remote.send("q", vec![7, 7]).await.unwrap();

        let message = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout")
            .expect("message");
        assert_eq!(message.body, vec![7, 7]);
    }

    #[tokio::test]
    async fn test_remote_consumer_counts_and_detaches() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let acceptor = serve(&broker).await;
        let config = TransportConfig::new("127.0.0.1", acceptor.local_addr().port());

        let remote = RemoteSession::connect(&config).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let consumer = remote
            .consume(
                "q",
                Arc::new(move |m| {
                    let _ = tx.send(m.body);
                }),
            )
            .await
            .unwrap();

        assert_eq!(remote.consumer_count("q").await.unwrap(), 1);

        broker.send("q", vec![1, 2, 3]).unwrap();
        let body = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout")
            .expect("message");
        assert_eq!(body, vec![1, 2, 3]);

        consumer.close();
        for _ in 0..100 {
            if broker.consumer_count("q").unwrap() == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.consumer_count("q").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remote_errors_are_reported() {
        let broker = EmbeddedBroker::new("test");
        let acceptor = serve(&broker).await;
        let remote = RemoteSession::connect(&TransportConfig::new(
            "127.0.0.1",
            acceptor.local_addr().port(),
        ))
        .await
        .unwrap();

        let result = remote.send("missing", vec![]).await;
        assert!(matches!(result, Err(BusError::Remote(_))));

        assert!(remote.create_queue("fresh", false).await.unwrap());
        assert!(!remote.create_queue("fresh", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_detaches_remote_consumers() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let acceptor = serve(&broker).await;
        let config = TransportConfig::new("127.0.0.1", acceptor.local_addr().port());

        let remote = RemoteSession::connect(&config).await.unwrap();
        let _consumer = remote.consume("q", Arc::new(|_| {})).await.unwrap();
        wait_for_consumers(&broker, "q", 1).await;

        remote.close().await;
        drop(remote);

        for _ in 0..200 {
            if broker.consumer_count("q").unwrap() == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("remote consumer still attached after disconnect");
    }

    #[tokio::test]
    async fn test_acceptor_stop_fails_pending_clients() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let acceptor = serve(&broker).await;
        let remote = RemoteSession::connect(&TransportConfig::new(
            "127.0.0.1",
            acceptor.local_addr().port(),
        ))
        .await
        .unwrap();

        acceptor.stop();

        let mut failed = false;
        for _ in 0..100 {
            if remote.consumer_count("q").await.is_err() {
                failed = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(failed);
    }

    struct DenyAll;

    impl SecurityManager for DenyAll {
        fn authorize(&self, _connection: &ConnectionInfo) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_security_manager_can_refuse() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let acceptor = BrokerAcceptor::bind(
            broker.clone(),
            &TransportConfig::default(),
            Arc::new(DenyAll),
        )
        .await
        .unwrap();

        // The handshake itself may already fail if the refusal races it.
        let Ok(remote) = RemoteSession::connect(&TransportConfig::new(
            "127.0.0.1",
            acceptor.local_addr().port(),
        ))
        .await
        else {
            return;
        };

        let result = timeout(Duration::from_secs(2), remote.consumer_count("q"))
            .await
            .expect("refused connection should fail promptly");
        assert!(result.is_err());
    }
}

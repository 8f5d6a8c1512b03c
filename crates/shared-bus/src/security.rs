//! # Connection Security
//!
//! The acceptor asks a [`SecurityManager`] before serving a connection.

use std::net::SocketAddr;
use tracing::trace;

/// What the acceptor knows about an incoming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote socket address.
    pub peer_addr: SocketAddr,
}

/// Decides whether a connection may use the broker.
pub trait SecurityManager: Send + Sync {
    fn authorize(&self, connection: &ConnectionInfo) -> bool;
}

/// Authorizes every connection.
///
/// Peer authentication is left to the transport's mutual-TLS handshake;
/// any connection that reaches the broker is trusted.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveSecurityManager;

impl SecurityManager for PermissiveSecurityManager {
    fn authorize(&self, connection: &ConnectionInfo) -> bool {
        trace!(peer = %connection.peer_addr, "Connection authorized");
        true
    }
}

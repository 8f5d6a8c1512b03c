//! TCP acceptor serving an embedded broker to remote sessions.

use super::frame::{read_frame, write_frame, ClientFrame, ServerFrame};
use super::TransportConfig;
use crate::broker::EmbeddedBroker;
use crate::security::{ConnectionInfo, SecurityManager};
use crate::subscriber::ConsumerHandle;
use crate::{BusError, Message, MessageHandler, PROTOCOL_VERSION};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Listens for remote sessions and bridges them onto a broker.
///
/// Dropping the acceptor stops it and disconnects every client.
pub struct BrokerAcceptor {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerAcceptor {
    /// Bind to `config`'s address and start accepting connections.
    pub async fn bind(
        broker: EmbeddedBroker,
        config: &TransportConfig,
        security: Arc<dyn SecurityManager>,
    ) -> Result<Self, BusError> {
        let listener = TcpListener::bind(config.address()).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            broker = %broker.name(),
            address = %local_addr,
            dev_tls = config.tls.is_development(),
            "Broker acceptor listening"
        );

        let task = tokio::spawn(accept_loop(listener, broker, security, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Address actually bound (useful when the configured port was 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and drop all client connections.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!(address = %self.local_addr, "Broker acceptor stopped");
        }
    }
}

impl Drop for BrokerAcceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    broker: EmbeddedBroker,
    security: Arc<dyn SecurityManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Dropping the set aborts every connection task.
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    if !security.authorize(&ConnectionInfo { peer_addr }) {
                        warn!(peer = %peer_addr, "Connection refused by security manager");
                        continue;
                    }
                    connections.spawn(serve_connection(stream, peer_addr, broker.clone()));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, broker: EmbeddedBroker) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Could not disable Nagle");
    }
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut subscriptions: HashMap<u64, ConsumerHandle> = HashMap::new();

    let writer_loop = async {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!(peer = %peer, error = %e, "Write failed");
                break;
            }
        }
    };

    let reader_loop = async {
        match read_frame::<_, ClientFrame>(&mut reader).await {
            Ok(Some(ClientFrame::Hello { version })) if version == PROTOCOL_VERSION => {
                debug!(peer = %peer, "Client connected");
            }
            other => {
                warn!(peer = %peer, frame = ?other.map(|f| f.is_some()), "Handshake failed");
                return;
            }
        }

        loop {
            let frame = match read_frame::<_, ClientFrame>(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Dropping connection");
                    break;
                }
            };
            if let Some(reply) = handle_frame(frame, &broker, &out_tx, &mut subscriptions) {
                if out_tx.send(reply).is_err() {
                    break;
                }
            }
        }
    };

    tokio::select! {
        () = reader_loop => {}
        () = writer_loop => {}
    }

    debug!(peer = %peer, detached = subscriptions.len(), "Client disconnected");
    // Dropping the handles detaches the client's consumers.
    subscriptions.clear();
}

fn handle_frame(
    frame: ClientFrame,
    broker: &EmbeddedBroker,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
    subscriptions: &mut HashMap<u64, ConsumerHandle>,
) -> Option<ServerFrame> {
    match frame {
        ClientFrame::Hello { .. } => None,
        ClientFrame::CreateQueue {
            request_id,
            name,
            durable,
        } => Some(ServerFrame::reply(
            request_id,
            broker.create_queue(&name, durable).map(u64::from),
        )),
        ClientFrame::Send {
            request_id,
            queue,
            body,
        } => Some(ServerFrame::reply(
            request_id,
            broker.send(&queue, body).map(|()| 0),
        )),
        ClientFrame::Subscribe {
            request_id,
            subscription_id,
            queue,
        } => {
            let tx = out_tx.clone();
            let handler: MessageHandler = Arc::new(move |message: Message| {
                let _ = tx.send(ServerFrame::Deliver {
                    subscription_id,
                    queue: message.queue,
                    body: message.body,
                });
            });
            let result = broker.consume(&queue, handler).map(|handle| {
                subscriptions.insert(subscription_id, handle);
                0
            });
            Some(ServerFrame::reply(request_id, result))
        }
        ClientFrame::Unsubscribe { subscription_id } => {
            subscriptions.remove(&subscription_id);
            None
        }
        ClientFrame::ConsumerCount { request_id, queue } => Some(ServerFrame::reply(
            request_id,
            broker.consumer_count(&queue).map(|count| count as u64),
        )),
    }
}

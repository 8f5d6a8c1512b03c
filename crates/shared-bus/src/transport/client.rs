//! Client session for a broker in another process.

use super::frame::{read_frame, write_frame, ClientFrame, ServerFrame};
use super::TransportConfig;
use crate::session::BrokerSession;
use crate::subscriber::ConsumerHandle;
use crate::{BusError, Message, MessageHandler, PROTOCOL_VERSION};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ClientInner {
    /// Outstanding requests keyed by request id.
    pending: DashMap<u64, oneshot::Sender<Result<u64, BusError>>>,
    /// Active subscriptions keyed by subscription id.
    subscriptions: DashMap<u64, MessageHandler>,
    writer: mpsc::UnboundedSender<ClientFrame>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ClientInner {
    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Ack { request_id, value } => self.complete(request_id, Ok(value)),
            ServerFrame::Error {
                request_id,
                message,
            } => self.complete(request_id, Err(BusError::Remote(message))),
            ServerFrame::Deliver {
                subscription_id,
                queue,
                body,
            } => {
                let handler = self
                    .subscriptions
                    .get(&subscription_id)
                    .map(|entry| Arc::clone(entry.value()));
                match handler {
                    Some(handler) => handler(Message { queue, body }),
                    None => debug!(subscription_id, "Delivery for detached subscription dropped"),
                }
            }
        }
    }

    fn complete(&self, request_id: u64, result: Result<u64, BusError>) {
        match self.pending.remove(&request_id) {
            Some((_, tx)) => {
                let _ = tx.send(result);
            }
            None => warn!(request_id, "Reply for unknown request"),
        }
    }

    /// Mark the session dead, drop every subscription and fail every
    /// outstanding request.
    fn fail_all(&self, error: BusError) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscriptions.clear();
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }
}

/// Session on a broker reached over TCP.
pub struct RemoteSession {
    inner: Arc<ClientInner>,
    address: String,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RemoteSession {
    /// Connect and perform the protocol handshake.
    pub async fn connect(config: &TransportConfig) -> Result<Self, BusError> {
        let address = config.address();
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| BusError::ConnectionLost(format!("{address}: {e}")))?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        write_frame(
            &mut writer,
            &ClientFrame::Hello {
                version: PROTOCOL_VERSION,
            },
        )
        .await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<ClientFrame>();
        let inner = Arc::new(ClientInner {
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
            writer: tx,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!(error = %e, "Remote session write failed");
                    break;
                }
            }
        });

        let reader_inner = Arc::clone(&inner);
        let reader_address = address.clone();
        let reader_task = tokio::spawn(async move {
            let reason = loop {
                match read_frame::<_, ServerFrame>(&mut reader).await {
                    Ok(Some(frame)) => reader_inner.dispatch(frame),
                    Ok(None) => break "connection closed by broker".to_string(),
                    Err(e) => break e.to_string(),
                }
            };
            info!(address = %reader_address, reason = %reason, "Remote session disconnected");
            reader_inner.fail_all(BusError::ConnectionLost(reason));
        });

        debug!(address = %address, "Remote session connected");

        Ok(Self {
            inner,
            address,
            reader_task,
            writer_task,
        })
    }

    /// Broker address this session is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the connection is still usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::ConnectionLost(self.address.clone()))
        }
    }

    /// Send a request frame and wait for its `Ack`/`Error`.
    async fn request(&self, build: impl FnOnce(u64) -> ClientFrame) -> Result<u64, BusError> {
        self.ensure_open()?;
        let request_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(request_id, tx);

        // fail_all may have drained the map between the check and the insert.
        if !self.is_connected() {
            self.inner.pending.remove(&request_id);
            return Err(BusError::ConnectionLost(self.address.clone()));
        }

        if self.inner.writer.send(build(request_id)).is_err() {
            self.inner.pending.remove(&request_id);
            return Err(BusError::ConnectionLost(self.address.clone()));
        }

        rx.await
            .unwrap_or_else(|_| Err(BusError::ConnectionLost(self.address.clone())))
    }
}

#[async_trait]
impl BrokerSession for RemoteSession {
    async fn create_queue(&self, name: &str, durable: bool) -> Result<bool, BusError> {
        let name = name.to_string();
        self.request(|request_id| ClientFrame::CreateQueue {
            request_id,
            name,
            durable,
        })
        .await
        .map(|created| created != 0)
    }

    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BusError> {
        let queue = queue.to_string();
        self.request(|request_id| ClientFrame::Send {
            request_id,
            queue,
            body,
        })
        .await
        .map(|_| ())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: MessageHandler,
    ) -> Result<ConsumerHandle, BusError> {
        let subscription_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.insert(subscription_id, handler);

        let queue_name = queue.to_string();
        let subscribed = self
            .request(|request_id| ClientFrame::Subscribe {
                request_id,
                subscription_id,
                queue: queue_name,
            })
            .await;
        if let Err(e) = subscribed {
            self.inner.subscriptions.remove(&subscription_id);
            return Err(e);
        }

        let inner = Arc::clone(&self.inner);
        Ok(ConsumerHandle::new(queue, move || {
            inner.subscriptions.remove(&subscription_id);
            let _ = inner
                .writer
                .send(ClientFrame::Unsubscribe { subscription_id });
        }))
    }

    async fn consumer_count(&self, queue: &str) -> Result<usize, BusError> {
        let queue = queue.to_string();
        self.request(|request_id| ClientFrame::ConsumerCount { request_id, queue })
            .await
            .map(|count| count as usize)
    }

    async fn close(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        self.reader_task.abort();
        self.writer_task.abort();
        self.inner.fail_all(BusError::SessionClosed);
        debug!(address = %self.address, "Remote session closed");
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

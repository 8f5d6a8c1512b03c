//! # Embedded Broker
//!
//! In-process queue broker. Each queue is point-to-point: a message goes to
//! exactly one of the attached consumers. Consumers are served by one
//! broker-owned task each, which invokes the consumer's callback.

use crate::subscriber::ConsumerHandle;
use crate::{BusError, Message, MessageHandler};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// A single named queue.
struct Queue {
    name: String,
    durable: bool,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    /// Shared by competing consumers; whoever holds the lock takes the next message.
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    consumers: AtomicUsize,
}

struct BrokerInner {
    name: String,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    messages_routed: AtomicU64,
}

/// In-process broker instance.
///
/// Cloning is cheap; all clones share the same queues.
#[derive(Clone)]
pub struct EmbeddedBroker {
    inner: Arc<BrokerInner>,
}

impl EmbeddedBroker {
    /// Start a broker with no queues.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let name = name.into();
        info!(broker = %name, "Embedded broker started");
        Self {
            inner: Arc::new(BrokerInner {
                name,
                queues: RwLock::new(HashMap::new()),
                running: AtomicBool::new(true),
                shutdown,
                messages_routed: AtomicU64::new(0),
            }),
        }
    }

    /// Broker instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether [`stop`](Self::stop) has not been called yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Create a queue. Returns `false` if it already existed.
    pub fn create_queue(&self, name: &str, durable: bool) -> Result<bool, BusError> {
        self.ensure_running()?;
        let mut queues = self.inner.queues.write();
        if queues.contains_key(name) {
            return Ok(false);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        queues.insert(
            name.to_string(),
            Arc::new(Queue {
                name: name.to_string(),
                durable,
                sender,
                receiver: AsyncMutex::new(receiver),
                consumers: AtomicUsize::new(0),
            }),
        );

        debug!(broker = %self.inner.name, queue = name, durable, "Queue created");
        Ok(true)
    }

    /// Names of all queues, sorted.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Durability flag of a queue, if it exists.
    #[must_use]
    pub fn is_durable(&self, queue: &str) -> Option<bool> {
        self.inner.queues.read().get(queue).map(|q| q.durable)
    }

    /// Enqueue a message.
    pub fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BusError> {
        self.ensure_running()?;
        let queue = self.queue(queue)?;
        queue
            .sender
            .send(body)
            .map_err(|_| BusError::BrokerStopped)?;
        self.inner.messages_routed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Attach a consumer. `handler` runs on a broker-owned task for every
    /// message this consumer takes off the queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn consume(&self, queue: &str, handler: MessageHandler) -> Result<ConsumerHandle, BusError> {
        let mut shutdown = self.inner.shutdown.subscribe();
        self.ensure_running()?;
        let queue = self.queue(queue)?;
        queue.consumers.fetch_add(1, Ordering::SeqCst);

        let task_queue = Arc::clone(&queue);
        let task = tokio::spawn(async move {
            loop {
                let body = tokio::select! {
                    body = async { task_queue.receiver.lock().await.recv().await } => body,
                    _ = shutdown.changed() => break,
                };
                let Some(body) = body else {
                    break;
                };
                handler(Message {
                    queue: task_queue.name.clone(),
                    body,
                });
            }
        });

        debug!(
            broker = %self.inner.name,
            queue = %queue.name,
            consumers = queue.consumers.load(Ordering::SeqCst),
            "Consumer attached"
        );

        let name = queue.name.clone();
        Ok(ConsumerHandle::new(name, move || {
            task.abort();
            queue.consumers.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    /// Number of consumers attached to a queue.
    pub fn consumer_count(&self, queue: &str) -> Result<usize, BusError> {
        Ok(self.queue(queue)?.consumers.load(Ordering::SeqCst))
    }

    /// Total messages accepted by [`send`](Self::send).
    #[must_use]
    pub fn messages_routed(&self) -> u64 {
        self.inner.messages_routed.load(Ordering::Relaxed)
    }

    /// Stop the broker, dropping all queues and undelivered messages.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        let dropped = {
            let mut queues = self.inner.queues.write();
            let count = queues.len();
            queues.clear();
            count
        };
        info!(broker = %self.inner.name, queues = dropped, "Embedded broker stopped");
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BusError::BrokerStopped)
        }
    }

    fn queue(&self, name: &str) -> Result<Arc<Queue>, BusError> {
        self.inner.queues.read().get(name).cloned().ok_or_else(|| {
            warn!(broker = %self.inner.name, queue = name, "Queue not found");
            BusError::QueueNotFound(name.to_string())
        })
    }
}

impl std::fmt::Debug for EmbeddedBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedBroker")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn collecting_handler() -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |message| {
            let _ = tx.send(message);
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_send_and_consume() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();

        let (handler, mut rx) = collecting_handler();
        let _consumer = broker.consume("q", handler).unwrap();

        broker.send("q", b"hello".to_vec()).unwrap();

        let message = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout")
            .expect("message");
        assert_eq!(message.queue, "q");
        assert_eq!(message.body, b"hello");
        assert_eq!(broker.messages_routed(), 1);
    }

    #[tokio::test]
    async fn test_message_sent_before_consumer_is_kept() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        broker.send("q", vec![1]).unwrap();

        let (handler, mut rx) = collecting_handler();
        let _consumer = broker.consume("q", handler).unwrap();

        let message = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout")
            .expect("message");
        assert_eq!(message.body, vec![1]);
    }

    #[tokio::test]
    async fn test_competing_consumers_each_message_once() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();

        let (handler, mut rx) = collecting_handler();
        let _a = broker.consume("q", Arc::clone(&handler)).unwrap();
        let _b = broker.consume("q", handler).unwrap();

        for i in 0..10u8 {
            broker.send("q", vec![i]).unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..10 {
            let message = timeout(Duration::from_millis(500), rx.recv())
                .await
                .expect("timeout")
                .expect("message");
            seen.push(message.body[0]);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10u8).collect::<Vec<_>>());

        // Nothing delivered twice.
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_consumer_count_tracks_handles() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        assert_eq!(broker.consumer_count("q").unwrap(), 0);

        let (handler, _rx) = collecting_handler();
        let a = broker.consume("q", Arc::clone(&handler)).unwrap();
        let b = broker.consume("q", handler).unwrap();
        assert_eq!(broker.consumer_count("q").unwrap(), 2);

        a.close();
        assert_eq!(broker.consumer_count("q").unwrap(), 1);
        drop(b);
        assert_eq!(broker.consumer_count("q").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_queue_is_idempotent() {
        let broker = EmbeddedBroker::new("test");
        assert!(broker.create_queue("q", false).unwrap());
        assert!(!broker.create_queue("q", true).unwrap());
        assert_eq!(broker.is_durable("q"), Some(false));
        assert_eq!(broker.queue_names(), vec!["q".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let broker = EmbeddedBroker::new("test");
        assert_eq!(
            broker.send("missing", vec![]),
            Err(BusError::QueueNotFound("missing".to_string()))
        );
        assert!(broker.consumer_count("missing").is_err());
    }

    #[tokio::test]
    async fn test_stop_rejects_operations() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        broker.stop();

        assert!(!broker.is_running());
        assert_eq!(broker.send("q", vec![]), Err(BusError::BrokerStopped));
        assert_eq!(broker.create_queue("r", false), Err(BusError::BrokerStopped));
        assert!(broker.queue_names().is_empty());

        // Second stop is a no-op.
        broker.stop();
    }
}

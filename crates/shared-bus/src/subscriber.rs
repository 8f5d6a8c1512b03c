//! # Consumer Handles
//!
//! The receiving side of a queue. A handle keeps its consumer attached;
//! closing or dropping it detaches the consumer and updates the queue's
//! consumer count.

use parking_lot::Mutex;
use tracing::debug;

type Closer = Box<dyn FnOnce() + Send>;

/// An attached consumer.
///
/// When dropped, the consumer is automatically detached.
pub struct ConsumerHandle {
    /// Queue this consumer is attached to.
    queue: String,

    /// Detach action, taken exactly once.
    closer: Mutex<Option<Closer>>,
}

impl ConsumerHandle {
    /// Create a handle that runs `closer` when the consumer is detached.
    pub fn new(queue: impl Into<String>, closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            queue: queue.into(),
            closer: Mutex::new(Some(Box::new(closer))),
        }
    }

    /// Queue this consumer is attached to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Whether the consumer is still attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.closer.lock().is_some()
    }

    /// Detach the consumer. Later calls are no-ops.
    pub fn close(&self) {
        let closer = self.closer.lock().take();
        if let Some(closer) = closer {
            closer();
            debug!(queue = %self.queue, "Consumer detached");
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("queue", &self.queue)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_close_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = ConsumerHandle::new("q", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.is_attached());
        handle.close();
        handle.close();
        assert!(!handle.is_attached());
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_detaches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        {
            let _handle = ConsumerHandle::new("q", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

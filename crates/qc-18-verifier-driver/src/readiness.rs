//! # Readiness Polling
//!
//! Blocks the calling task until a broker reports enough consumers on a
//! queue. Used for workers attaching to the shared request queue, and for a
//! node's internal verification queue.

use crate::domain::DriverError;
use quantum_telemetry::READINESS_TIMEOUTS;
use shared_bus::BrokerSession;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Fixed-interval consumer-count poller.
///
/// Holds no state between calls, so one poller may serve any number of
/// concurrent waits.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    retry_interval: Duration,
}

impl ReadinessPoller {
    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Wait until `queue` has at least `target` consumers.
    ///
    /// Query failures (missing queue, broker briefly unreachable) count as
    /// "not ready yet", and so does a query still unanswered at the
    /// deadline. Returns the count that satisfied the target. A timeout too
    /// large to represent means no deadline.
    pub async fn wait_for_consumer_count(
        &self,
        session: &dyn BrokerSession,
        queue: &str,
        target: usize,
        timeout: Duration,
    ) -> Result<usize, DriverError> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let mut observed = 0;

        loop {
            match bounded(deadline, session.consumer_count(queue)).await {
                Some(Ok(count)) => {
                    observed = count;
                    if count >= target {
                        info!(
                            queue,
                            consumers = count,
                            waited_ms = started.elapsed().as_millis(),
                            "Consumer target reached"
                        );
                        return Ok(count);
                    }
                }
                Some(Err(e)) => debug!(queue, error = %e, "Consumer count query failed"),
                None => debug!(queue, "Consumer count query unanswered at deadline"),
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(timed_out(queue, target, observed, started));
                    }
                    self.retry_interval.min(deadline - now)
                }
                None => self.retry_interval,
            };
            sleep(pause).await;
        }
    }
}

/// Run `future` until `deadline`; `None` if the deadline passed first.
pub(crate) async fn bounded<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

pub(crate) fn timed_out(queue: &str, target: usize, observed: usize, started: Instant) -> DriverError {
    READINESS_TIMEOUTS.inc();
    warn!(queue, target, observed, "Timed out waiting for consumers");
    DriverError::ReadinessTimeout {
        queue: queue.to_string(),
        target,
        observed,
        waited: started.elapsed(),
    }
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::{BusError, ConsumerHandle, EmbeddedBroker, LocalSession, MessageHandler};
    use std::sync::Arc;

    fn noop() -> shared_bus::MessageHandler {
        Arc::new(|_| {})
    }

    /// Session whose broker accepted the connection but never answers.
    struct SilentSession;

    #[async_trait::async_trait]
    impl BrokerSession for SilentSession {
        async fn create_queue(&self, _name: &str, _durable: bool) -> Result<bool, BusError> {
            futures::future::pending().await
        }

        async fn send(&self, _queue: &str, _body: Vec<u8>) -> Result<(), BusError> {
            futures::future::pending().await
        }

        async fn consume(
            &self,
            _queue: &str,
            _handler: MessageHandler,
        ) -> Result<ConsumerHandle, BusError> {
            futures::future::pending().await
        }

        async fn consumer_count(&self, _queue: &str) -> Result<usize, BusError> {
            futures::future::pending().await
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_already_satisfied() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let _c = broker.consume("q", noop()).unwrap();
        let session = LocalSession::new(broker);

        let count = ReadinessPoller::default()
            .wait_for_consumer_count(&session, "q", 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_zero_target_returns_immediately() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let session = LocalSession::new(broker);

        assert_eq!(
            ReadinessPoller::default()
                .wait_for_consumer_count(&session, "q", 0, Duration::ZERO)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_waits_for_late_consumer() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let session = LocalSession::new(broker.clone());

        let late = tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            broker.consume("q", noop()).unwrap()
        });

        let count = ReadinessPoller::new(Duration::from_millis(20))
            .wait_for_consumer_count(&session, "q", 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(count, 1);
        drop(late.await.unwrap());
    }

    #[tokio::test]
    async fn test_times_out_below_target() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let _c = broker.consume("q", noop()).unwrap();
        let session = LocalSession::new(broker);

        let result = ReadinessPoller::new(Duration::from_millis(20))
            .wait_for_consumer_count(&session, "q", 2, Duration::from_millis(200))
            .await;

        match result {
            Err(DriverError::ReadinessTimeout {
                target, observed, ..
            }) => {
                assert_eq!(target, 2);
                assert_eq!(observed, 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_queue_times_out() {
        let session = LocalSession::new(EmbeddedBroker::new("test"));
        let result = ReadinessPoller::new(Duration::from_millis(10))
            .wait_for_consumer_count(&session, "absent", 1, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(DriverError::ReadinessTimeout { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_waiters() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let session = Arc::new(LocalSession::new(broker.clone()));
        let poller = ReadinessPoller::new(Duration::from_millis(10));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    poller
                        .wait_for_consumer_count(session.as_ref(), "q", 2, Duration::from_secs(5))
                        .await
                })
            })
            .collect();

        sleep(Duration::from_millis(50)).await;
        let _a = broker.consume("q", noop()).unwrap();
        let _b = broker.consume("q", noop()).unwrap();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn test_unanswered_query_still_times_out() {
        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ReadinessPoller::new(Duration::from_millis(20)).wait_for_consumer_count(
                &SilentSession,
                "q",
                1,
                Duration::from_millis(200),
            ),
        )
        .await
        .expect("poller must return by its own deadline");

        match result {
            Err(DriverError::ReadinessTimeout { observed, .. }) => assert_eq!(observed, 0),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_means_no_deadline() {
        let broker = EmbeddedBroker::new("test");
        broker.create_queue("q", false).unwrap();
        let _c = broker.consume("q", noop()).unwrap();
        let session = LocalSession::new(broker);

        let count = ReadinessPoller::default()
            .wait_for_consumer_count(&session, "q", 1, Duration::MAX)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_bounded_without_deadline_runs_to_completion() {
        assert_eq!(bounded(None, async { 7 }).await, Some(7));
        let past = Instant::now();
        assert_eq!(bounded(Some(past), futures::future::pending::<()>()).await, None);
    }
}

//! Correlation Registry - matches verification responses to waiting callers.
//!
//! Flow:
//! 1. Requestor draws a `CorrelationId` and calls `register()` to get a
//!    [`CompletionHandle`]
//! 2. Requestor sends the request carrying that id
//! 3. The response demultiplexer calls `resolve()` when the response lands
//! 4. The caller awaits the handle
//!
//! `resolve()` removes the entry and fires its sender in one step, so a
//! second response for the same id finds nothing and is reported as
//! unmatched. The sender is moved out of the map; resolving twice is not
//! expressible.

use crate::domain::errors::HandleError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::{CorrelationId, VerificationOutcome};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A registered request waiting for its response.
struct PendingVerification {
    /// Channel to the caller's handle
    sender: oneshot::Sender<VerificationOutcome>,
    /// When the request was registered
    registered_at: Instant,
}

/// Statistics for the registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Total handles registered
    pub total_registered: AtomicU64,
    /// Total handles resolved with an outcome
    pub total_resolved: AtomicU64,
    /// Responses whose id was not registered
    pub total_unmatched: AtomicU64,
    /// Responses whose caller had already dropped its handle
    pub total_abandoned: AtomicU64,
    /// Entries removed without a response (rollback)
    pub total_removed: AtomicU64,
}

/// What happened to a response handed to [`CorrelationRegistry::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting handle received the outcome.
    Delivered {
        /// Time between registration and resolution.
        round_trip: Duration,
    },
    /// The entry existed but its handle had been dropped.
    Abandoned,
    /// No entry for this id: duplicate, late, or foreign response.
    Unmatched,
}

/// Concurrent map from correlation id to pending completion handle.
///
/// Safe to share between the task that submits requests and the broker task
/// that delivers responses; no external locking is needed.
pub struct CorrelationRegistry {
    pending: DashMap<CorrelationId, PendingVerification>,
    stats: RegistryStats,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: RegistryStats::default(),
        }
    }

    /// Register a handle for `correlation_id`.
    ///
    /// Returns `None` if the id is already pending; the caller should draw a
    /// new id.
    pub fn register(&self, correlation_id: CorrelationId) -> Option<CompletionHandle> {
        match self.pending.entry(correlation_id) {
            Entry::Occupied(_) => {
                debug!(correlation_id = %correlation_id, "Correlation id already pending");
                None
            }
            Entry::Vacant(slot) => {
                let (sender, receiver) = oneshot::channel();
                slot.insert(PendingVerification {
                    sender,
                    registered_at: Instant::now(),
                });
                self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
                Some(CompletionHandle {
                    correlation_id,
                    receiver,
                })
            }
        }
    }

    /// Remove the entry for `correlation_id` and deliver `outcome` to it.
    pub fn resolve(
        &self,
        correlation_id: CorrelationId,
        outcome: VerificationOutcome,
    ) -> Resolution {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %correlation_id,
                "Response for unknown correlation id, possible duplicate"
            );
            return Resolution::Unmatched;
        };

        let round_trip = pending.registered_at.elapsed();
        match pending.sender.send(outcome) {
            Ok(()) => {
                self.stats.total_resolved.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    round_trip_ms = round_trip.as_millis(),
                    "Verification resolved"
                );
                Resolution::Delivered { round_trip }
            }
            Err(_) => {
                self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %correlation_id, "Completion handle already dropped");
                Resolution::Abandoned
            }
        }
    }

    /// Drop the entry for `correlation_id` without resolving it.
    ///
    /// Its handle then completes with [`HandleError::Abandoned`].
    pub fn remove(&self, correlation_id: CorrelationId) -> bool {
        if self.pending.remove(&correlation_id).is_some() {
            self.stats.total_removed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Whether `correlation_id` is waiting for a response.
    pub fn is_pending(&self, correlation_id: CorrelationId) -> bool {
        self.pending.contains_key(&correlation_id)
    }

    /// Number of requests waiting for a response.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-assignment future for one verification.
///
/// Resolves to the worker's verdict, or to [`HandleError::Abandoned`] if the
/// registry entry was removed first. There is no built-in timeout; wrap it in
/// `tokio::time::timeout` if one is needed.
#[derive(Debug)]
pub struct CompletionHandle {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<VerificationOutcome>,
}

impl CompletionHandle {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl Future for CompletionHandle {
    type Output = Result<VerificationOutcome, HandleError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| HandleError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> CorrelationId {
        CorrelationId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = CorrelationRegistry::new();

        let handle = registry.register(id(1)).unwrap();
        assert!(registry.is_pending(id(1)));
        assert_eq!(registry.len(), 1);

        let resolution = registry.resolve(id(1), VerificationOutcome::Verified);
        assert!(matches!(resolution, Resolution::Delivered { .. }));
        assert!(registry.is_empty());

        assert_eq!(handle.await, Ok(VerificationOutcome::Verified));
    }

    #[tokio::test]
    async fn test_second_resolution_is_unmatched() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register(id(7)).unwrap();

        registry.resolve(id(7), VerificationOutcome::Rejected("first".into()));
        assert_eq!(
            registry.resolve(id(7), VerificationOutcome::Verified),
            Resolution::Unmatched
        );

        assert_eq!(
            handle.await,
            Ok(VerificationOutcome::Rejected("first".into()))
        );
        assert_eq!(registry.stats().total_resolved.load(Ordering::Relaxed), 1);
        assert_eq!(registry.stats().total_unmatched.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_resolve_unknown_id() {
        let registry = CorrelationRegistry::new();
        assert_eq!(
            registry.resolve(id(99), VerificationOutcome::Verified),
            Resolution::Unmatched
        );
    }

    #[test]
    fn test_duplicate_registration_refused() {
        let registry = CorrelationRegistry::new();
        let _handle = registry.register(id(3)).unwrap();
        assert!(registry.register(id(3)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_abandons_handle() {
        let registry = CorrelationRegistry::new();
        let handle = registry.register(id(5)).unwrap();

        assert!(registry.remove(id(5)));
        assert!(!registry.remove(id(5)));
        assert_eq!(registry.len(), 0);

        assert_eq!(handle.await, Err(HandleError::Abandoned));
    }

    #[test]
    fn test_dropped_handle_reported_as_abandoned() {
        let registry = CorrelationRegistry::new();
        drop(registry.register(id(11)).unwrap());

        assert_eq!(
            registry.resolve(id(11), VerificationOutcome::Verified),
            Resolution::Abandoned
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let registry = CorrelationRegistry::new();
        let handles: Vec<_> = (1..=4).map(|n| registry.register(id(n)).unwrap()).collect();

        for n in [3, 1, 4, 2] {
            registry.resolve(id(n), VerificationOutcome::Rejected(format!("tx-{n}")));
        }

        for (n, handle) in (1..=4).zip(handles) {
            assert_eq!(handle.correlation_id(), id(n));
            assert_eq!(
                handle.await.unwrap().failure(),
                Some(format!("tx-{n}").as_str())
            );
        }
    }
}

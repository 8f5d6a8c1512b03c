//! Ordered teardown for everything the driver starts.
//!
//! Components register a release action as they come up; `shutdown` runs
//! the actions in reverse registration order, so workers die before the
//! broker they are attached to.

use crate::domain::DriverError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

type ShutdownAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct ShutdownManager {
    actions: Mutex<Vec<(String, ShutdownAction)>>,
    shut_down: AtomicBool,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Add a release action.
    ///
    /// Fails with [`DriverError::ShutDown`] once shutdown has started; the
    /// action is dropped without running.
    pub fn register<F, Fut>(&self, label: impl Into<String>, action: F) -> Result<(), DriverError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut actions = self.actions.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DriverError::ShutDown);
        }
        let label = label.into();
        debug!(action = %label, "Registered shutdown action");
        actions.push((label, Box::new(move || action().boxed())));
        Ok(())
    }

    /// Number of actions waiting to run.
    pub fn pending(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Run every registered action, newest first. Returns how many ran.
    ///
    /// Later calls run nothing.
    pub async fn shutdown(&self) -> usize {
        let actions = {
            let mut actions = self.actions.lock();
            self.shut_down.store(true, Ordering::SeqCst);
            std::mem::take(&mut *actions)
        };

        let count = actions.len();
        if count > 0 {
            info!(actions = count, "Running shutdown sequence");
        }
        for (label, action) in actions.into_iter().rev() {
            debug!(action = %label, "Shutting down");
            action().await;
        }
        count
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

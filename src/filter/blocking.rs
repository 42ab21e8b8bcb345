//! Blocking filter: wait for the next matching token.
//!
//! A match is handed to exactly one thread currently inside [`BlockingFilter::wait`].
//! Matches that arrive while nobody waits, or while a previous token is still
//! unclaimed, are dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{CallbackError, ListenerResult};
use crate::token::Token;

use super::{AsFilterId, Callback, FilterHandle, FilterId, FilterRegistry, Predicate};

#[derive(Debug, Default)]
struct Slot {
    token: Option<Token>,
    waiters: usize,
}

/// Single-slot rendezvous between the consumer thread and waiters.
#[derive(Debug, Default)]
struct Rendezvous {
    slot: Mutex<Slot>,
    ready: Condvar,
    dropped: AtomicU64,
}

impl Rendezvous {
    // Only this module touches the slot and nothing in it can panic while
    // the lock is held, so a poisoned lock still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, token: &Token) {
        let mut slot = self.lock();
        if slot.waiters == 0 || slot.token.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        slot.token = Some(token.clone());
        self.ready.notify_one();
    }

    fn wait(&self, timeout: Duration) -> Option<Token> {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.lock();
        slot.waiters += 1;
        loop {
            if let Some(token) = slot.token.take() {
                slot.waiters -= 1;
                return Some(token);
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                slot.waiters -= 1;
                return None;
            }
            slot = self
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

struct Publish(Arc<Rendezvous>);

impl Callback for Publish {
    fn call(&self, token: &Token) -> Result<(), CallbackError> {
        self.0.publish(token);
        Ok(())
    }
}

/// A filter whose matches are consumed synchronously with [`wait`](Self::wait).
///
/// Dropping it removes the underlying filter.
pub struct BlockingFilter {
    handle: FilterHandle,
    registry: Arc<FilterRegistry>,
    rendezvous: Arc<Rendezvous>,
}

impl BlockingFilter {
    pub(crate) fn register(
        registry: Arc<FilterRegistry>,
        predicate: Box<dyn Predicate>,
    ) -> ListenerResult<Self> {
        let rendezvous = Arc::new(Rendezvous::default());
        let handle = registry.register(predicate, Arc::new(Publish(Arc::clone(&rendezvous))))?;
        Ok(Self {
            handle,
            registry,
            rendezvous,
        })
    }

    /// Blocks until the next matching token or until `timeout` elapses.
    ///
    /// Returns `None` on timeout, never before `timeout` has passed.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> Option<Token> {
        self.rendezvous.wait(timeout)
    }

    /// Matches dropped because no waiter was ready to take them.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.rendezvous.dropped.load(Ordering::Relaxed)
    }

    /// Handle of the underlying filter.
    #[must_use]
    pub fn handle(&self) -> &FilterHandle {
        &self.handle
    }

    /// Deregisters the underlying filter. Idempotent.
    pub fn remove(&self) -> ListenerResult<bool> {
        self.registry.remove(self.handle.id())
    }
}

impl AsFilterId for BlockingFilter {
    fn filter_id(&self) -> FilterId {
        self.handle.id()
    }
}

impl std::fmt::Debug for BlockingFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingFilter")
            .field("id", &self.handle.id())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Drop for BlockingFilter {
    fn drop(&mut self) {
        let _ = self.registry.remove(self.handle.id());
    }
}

//! Buffered filter: bounded, lossy accumulation of matching tokens.
//!
//! Once the ring holds `capacity` tokens, each new match evicts the oldest.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{CallbackError, ConfigError, ListenerResult};
use crate::token::Token;

use super::{AsFilterId, Callback, FilterHandle, FilterId, FilterRegistry, Predicate};

#[derive(Debug)]
struct Ring {
    tokens: Mutex<VecDeque<Token>>,
    grown: Condvar,
    capacity: usize,
    evicted: AtomicU64,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            tokens: Mutex::new(VecDeque::with_capacity(capacity)),
            grown: Condvar::new(),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Token>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, token: &Token) {
        let mut tokens = self.lock();
        if tokens.len() == self.capacity {
            tokens.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        tokens.push_back(token.clone());
        self.grown.notify_all();
    }

    fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        if count == 0 {
            return true;
        }
        if count > self.capacity {
            return false;
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut tokens = self.lock();
        loop {
            if tokens.len() >= count {
                return true;
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return false;
            }
            tokens = self
                .grown
                .wait_timeout(tokens, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

struct Collect(Arc<Ring>);

impl Callback for Collect {
    fn call(&self, token: &Token) -> Result<(), CallbackError> {
        self.0.push(token);
        Ok(())
    }
}

/// A filter collecting its most recent matches for batch consumption.
///
/// Dropping it removes the underlying filter.
pub struct BufferedFilter {
    handle: FilterHandle,
    registry: Arc<FilterRegistry>,
    ring: Arc<Ring>,
}

impl BufferedFilter {
    pub(crate) fn register(
        registry: Arc<FilterRegistry>,
        predicate: Box<dyn Predicate>,
        capacity: usize,
    ) -> ListenerResult<Self> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity { capacity }.into());
        }
        let ring = Arc::new(Ring::new(capacity));
        let handle = registry.register(predicate, Arc::new(Collect(Arc::clone(&ring))))?;
        Ok(Self {
            handle,
            registry,
            ring,
        })
    }

    /// Blocks until at least `count` tokens are buffered or `timeout` elapses.
    ///
    /// Returns true if the count was reached. A count above the capacity can
    /// never be reached and returns false immediately.
    #[must_use]
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        self.ring.wait_for_count(count, timeout)
    }

    /// Empties the buffer, returning its tokens oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<Token> {
        self.ring.lock().drain(..).collect()
    }

    /// Number of buffered tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered tokens.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// Tokens evicted to make room for newer matches.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.ring.evicted.load(Ordering::Relaxed)
    }

    /// Handle of the underlying filter.
    #[must_use]
    pub fn handle(&self) -> &FilterHandle {
        &self.handle
    }

    /// Deregisters the underlying filter. Buffered tokens stay drainable.
    pub fn remove(&self) -> ListenerResult<bool> {
        self.registry.remove(self.handle.id())
    }
}

impl AsFilterId for BufferedFilter {
    fn filter_id(&self) -> FilterId {
        self.handle.id()
    }
}

impl std::fmt::Debug for BufferedFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedFilter")
            .field("id", &self.handle.id())
            .field("capacity", &self.ring.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BufferedFilter {
    fn drop(&mut self) {
        let _ = self.registry.remove(self.handle.id());
    }
}

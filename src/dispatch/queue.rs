//! Unbounded FIFO hand-off between the producer and the callback runner.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::filter::{Callback, FilterId};
use crate::token::Token;

/// A matched token waiting for its callback.
///
/// Holds the callback itself, captured at enqueue time, so removing the
/// filter afterwards does not cancel this delivery.
#[derive(Clone)]
pub struct Dispatch {
    /// Matching filter; `None` for the default token handler.
    pub filter: Option<FilterId>,
    /// Registry epoch the match was made in.
    pub epoch: u64,
    /// The matched token.
    pub token: Token,
    callback: Arc<dyn Callback>,
}

impl Dispatch {
    /// Creates an entry delivering `token` to `callback`.
    #[must_use]
    pub fn new(
        filter: Option<FilterId>,
        epoch: u64,
        token: Token,
        callback: Arc<dyn Callback>,
    ) -> Self {
        Self {
            filter,
            epoch,
            token,
            callback,
        }
    }

    pub(crate) fn callback(&self) -> &dyn Callback {
        self.callback.as_ref()
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("filter", &self.filter)
            .field("epoch", &self.epoch)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Thread-safe FIFO of [`Dispatch`] entries.
///
/// `push` never blocks. Any number of threads may push or pop; the listener
/// uses one of each.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: Sender<Dispatch>,
    rx: Receiver<Dispatch>,
}

impl DispatchQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Appends an entry.
    pub fn push(&self, entry: Dispatch) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(entry);
    }

    /// Pops the oldest entry, waiting up to `timeout` for one to arrive.
    #[must_use]
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Dispatch> {
        match self.rx.recv_timeout(timeout) {
            Ok(entry) => Some(entry),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drops every pending entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

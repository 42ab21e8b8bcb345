//! Listener counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the listener counters. Counters are cumulative
/// across listening sessions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStats {
    pub bytes_read: u64,
    pub tokens: u64,
    pub dispatched: u64,
    pub delivered: u64,
    pub callback_failures: u64,
    pub predicate_failures: u64,
    pub stale_discarded: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub bytes_read: AtomicU64,
    pub tokens: AtomicU64,
    pub dispatched: AtomicU64,
    pub delivered: AtomicU64,
    pub callback_failures: AtomicU64,
    pub predicate_failures: AtomicU64,
    pub stale_discarded: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            predicate_failures: self.predicate_failures.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
        }
    }
}

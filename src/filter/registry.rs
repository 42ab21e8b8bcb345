//! Filter registry.
//!
//! Insertion order is evaluation order. Each `clear` bumps an epoch; the
//! producer tags queued matches with the epoch of the snapshot they came
//! from, so the consumer can discard matches that a `clear` retracted.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{lock_err, panic_message, ListenerError, ListenerResult};
use crate::token::Token;

use super::{Callback, Filter, FilterHandle, FilterId, Predicate};

/// Filters matched by a single token, in registration order.
#[derive(Debug, Default)]
pub struct MatchSweep {
    /// Registry epoch the snapshot was taken at.
    pub epoch: u64,
    /// Matching filters.
    pub matched: Vec<Arc<Filter>>,
}

/// Thread-safe ordered set of filters.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: RwLock<Vec<Arc<Filter>>>,
    epoch: AtomicU64,
}

impl FilterRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter.
    pub fn register(
        &self,
        predicate: Box<dyn Predicate>,
        callback: Arc<dyn Callback>,
    ) -> ListenerResult<FilterHandle> {
        let filter = Arc::new(Filter::new(predicate, callback));
        let handle = FilterHandle::new(&filter);
        let mut filters = self.filters.write().map_err(|_| lock_err("registry.register"))?;
        filters.push(filter);
        Ok(handle)
    }

    /// Removes a filter. Returns false if it was already gone.
    pub fn remove(&self, id: FilterId) -> ListenerResult<bool> {
        let mut filters = self.filters.write().map_err(|_| lock_err("registry.remove"))?;
        let before = filters.len();
        filters.retain(|f| f.id() != id);
        Ok(filters.len() != before)
    }

    /// Removes every filter and retracts matches queued before this call.
    ///
    /// Returns the number of filters removed.
    pub fn clear(&self) -> ListenerResult<usize> {
        let mut filters = self.filters.write().map_err(|_| lock_err("registry.clear"))?;
        let removed = filters.len();
        filters.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        Ok(removed)
    }

    /// Current epoch. Matches tagged with an older epoch are stale.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Number of registered filters.
    pub fn len(&self) -> ListenerResult<usize> {
        Ok(self.filters.read().map_err(|_| lock_err("registry.len"))?.len())
    }

    /// Returns true if no filters are registered.
    pub fn is_empty(&self) -> ListenerResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Longest literal pattern among registered filters, 0 if none report one.
    pub fn longest_pattern_hint(&self) -> ListenerResult<usize> {
        let filters = self.filters.read().map_err(|_| lock_err("registry.longest_pattern_hint"))?;
        Ok(filters
            .iter()
            .filter_map(|f| f.predicate().pattern_len_hint())
            .max()
            .unwrap_or(0))
    }

    /// Evaluates every registered predicate against `token`.
    ///
    /// The filter list is snapshotted under the read lock; predicates run
    /// after it is released, so a predicate may itself register or remove
    /// filters. A panicking predicate counts as a non-match and is reported
    /// through `on_fault`; the sweep continues with the next filter.
    pub fn snapshot_match(
        &self,
        token: &Token,
        mut on_fault: impl FnMut(ListenerError),
    ) -> ListenerResult<MatchSweep> {
        let (epoch, snapshot) = {
            let filters = self.filters.read().map_err(|_| lock_err("registry.snapshot_match"))?;
            (self.epoch(), filters.clone())
        };

        let mut matched = Vec::new();
        for filter in snapshot {
            match catch_unwind(AssertUnwindSafe(|| filter.predicate().matches(token))) {
                Ok(true) => matched.push(filter),
                Ok(false) => {}
                Err(payload) => on_fault(ListenerError::PredicatePanicked {
                    filter: filter.id(),
                    message: panic_message(payload.as_ref()),
                }),
            }
        }

        Ok(MatchSweep { epoch, matched })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::filter::predicates::{exactly, starts_with};
    use crate::filter::{AsFilterId, Infallible};

    fn noop() -> Arc<dyn Callback> {
        Arc::new(Infallible(|_: &Token| {}))
    }

    #[test]
    fn matches_in_registration_order() {
        let registry = FilterRegistry::new();
        let a = registry.register(Box::new(starts_with("P")), noop()).unwrap();
        let _b = registry.register(Box::new(exactly("PONG")), noop()).unwrap();
        let c = registry.register(Box::new(exactly("PING")), noop()).unwrap();

        let sweep = registry.snapshot_match(&Token::new("PING", 0), |_| {}).unwrap();
        let ids: Vec<_> = sweep.matched.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec![a.id(), c.id()]);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = FilterRegistry::new();
        let handle = registry.register(Box::new(exactly("A")), noop()).unwrap();
        assert!(handle.is_registered());

        assert!(registry.remove(handle.filter_id()).unwrap());
        assert!(!registry.remove(handle.filter_id()).unwrap());
        assert!(!handle.is_registered());
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn clear_bumps_epoch() {
        let registry = FilterRegistry::new();
        registry.register(Box::new(exactly("A")), noop()).unwrap();
        registry.register(Box::new(exactly("B")), noop()).unwrap();

        let before = registry.epoch();
        assert_eq!(registry.clear().unwrap(), 2);
        assert_eq!(registry.epoch(), before + 1);
        assert_eq!(registry.len().unwrap(), 0);
    }

    #[test]
    fn panicking_predicate_is_a_non_match() {
        let registry = FilterRegistry::new();
        let bad = registry
            .register(Box::new(|_: &Token| -> bool { panic!("predicate exploded") }), noop())
            .unwrap();
        let good = registry.register(Box::new(exactly("X")), noop()).unwrap();

        let mut faults = Vec::new();
        let sweep = registry
            .snapshot_match(&Token::new("X", 0), |e| faults.push(e))
            .unwrap();

        assert_eq!(sweep.matched.len(), 1);
        assert_eq!(sweep.matched[0].id(), good.id());
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].filter(), Some(bad.id()));
        assert!(format!("{}", faults[0]).contains("predicate exploded"));
    }

    #[test]
    fn longest_pattern_hint_tracks_literals() {
        let registry = FilterRegistry::new();
        assert_eq!(registry.longest_pattern_hint().unwrap(), 0);
        registry.register(Box::new(exactly("PING")), noop()).unwrap();
        registry.register(Box::new(starts_with("STATUS=")), noop()).unwrap();
        registry.register(Box::new(|_: &Token| true), noop()).unwrap();
        assert_eq!(registry.longest_pattern_hint().unwrap(), 7);
    }

    #[test]
    fn predicate_may_mutate_registry() {
        let registry = Arc::new(FilterRegistry::new());
        let inner = Arc::clone(&registry);
        registry
            .register(
                Box::new(move |_: &Token| {
                    inner.register(Box::new(exactly("late")), noop()).unwrap();
                    true
                }),
                noop(),
            )
            .unwrap();

        let sweep = registry.snapshot_match(&Token::new("late", 0), |_| {}).unwrap();
        // The filter added mid-sweep is not part of this token's snapshot.
        assert_eq!(sweep.matched.len(), 1);
        assert_eq!(registry.len().unwrap(), 2);
    }
}

//! Consumer side: pops matches and invokes callbacks.
//!
//! Exactly one callback runs at a time. A callback that blocks stalls
//! delivery to every other filter; errors and panics are routed to the
//! exception handler and never end the loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::{panic_message, ListenerError};
use crate::filter::FilterRegistry;
use crate::listener::handlers::Handlers;
use crate::listener::stats::Counters;

use super::queue::{Dispatch, DispatchQueue};

/// What happened to a popped entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Delivered,
    Failed,
    Stale,
}

pub(crate) struct CallbackRunner<'a> {
    pub queue: &'a DispatchQueue,
    pub registry: &'a FilterRegistry,
    pub handlers: &'a Handlers,
    pub counters: &'a Counters,
    pub poll_interval: Duration,
}

impl CallbackRunner<'_> {
    /// Runs until `listening` returns false. Entries popped after that are dropped.
    pub fn run(&self, listening: impl Fn() -> bool) {
        while listening() {
            let Some(entry) = self.queue.pop_timeout(self.poll_interval) else {
                continue;
            };
            if listening() {
                self.invoke(entry);
            }
        }
    }

    pub fn invoke(&self, entry: Dispatch) -> Outcome {
        if entry.epoch < self.registry.epoch() {
            Counters::add(&self.counters.stale_discarded, 1);
            return Outcome::Stale;
        }

        let result = catch_unwind(AssertUnwindSafe(|| entry.callback().call(&entry.token)));
        let err = match result {
            Ok(Ok(())) => {
                Counters::add(&self.counters.delivered, 1);
                return Outcome::Delivered;
            }
            Ok(Err(source)) => ListenerError::Callback {
                filter: entry.filter,
                source,
            },
            Err(payload) => ListenerError::CallbackPanicked {
                filter: entry.filter,
                message: panic_message(payload.as_ref()),
            },
        };

        Counters::add(&self.counters.callback_failures, 1);
        self.handlers.exception(&err);
        Outcome::Failed
    }
}

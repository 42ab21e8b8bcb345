//! Hand-off between the producer thread and the callback runner.

/// Thread-safe FIFO of matched tokens.
pub mod queue;
/// Consumer loop invoking callbacks.
pub(crate) mod runner;

pub use queue::{Dispatch, DispatchQueue};

//! Filters: (predicate, callback) pairs evaluated against every new token.
//!
//! Predicates and callbacks are capabilities rather than a class hierarchy.
//! Blocking and buffered filters are ordinary registry entries whose callback
//! feeds a private synchronization primitive.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CallbackError;
use crate::token::Token;

/// Single-slot wait for the next matching token.
pub mod blocking;
/// Bounded, lossy accumulation of matching tokens.
pub mod buffered;
/// Ready-made predicates.
pub mod predicates;
/// Ordered, lock-protected set of filters.
pub mod registry;

pub use blocking::BlockingFilter;
pub use buffered::BufferedFilter;
pub use registry::{FilterRegistry, MatchSweep};

/// Unique identifier for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(Uuid);

impl FilterId {
    /// Create a new random filter id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FilterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decides whether a token is of interest to a filter.
pub trait Predicate: Send + Sync {
    /// Returns true if `token` matches.
    fn matches(&self, token: &Token) -> bool;

    /// Minimum token length this predicate can match, if known.
    ///
    /// Used to size device reads; never affects correctness.
    fn pattern_len_hint(&self) -> Option<usize> {
        None
    }
}

impl<F> Predicate for F
where
    F: Fn(&Token) -> bool + Send + Sync,
{
    fn matches(&self, token: &Token) -> bool {
        self(token)
    }
}

/// Receives tokens matched by a filter. Runs on the listener's consumer thread.
pub trait Callback: Send + Sync {
    /// Handles a matched token. Errors are routed to the exception handler.
    fn call(&self, token: &Token) -> Result<(), CallbackError>;
}

impl<F> Callback for F
where
    F: Fn(&Token) -> Result<(), CallbackError> + Send + Sync,
{
    fn call(&self, token: &Token) -> Result<(), CallbackError> {
        self(token)
    }
}

/// Adapts a callback that cannot fail.
pub struct Infallible<F>(pub F);

impl<F> Callback for Infallible<F>
where
    F: Fn(&Token) + Send + Sync,
{
    fn call(&self, token: &Token) -> Result<(), CallbackError> {
        (self.0)(token);
        Ok(())
    }
}

/// A registered (predicate, callback) pair.
pub struct Filter {
    id: FilterId,
    predicate: Box<dyn Predicate>,
    callback: Arc<dyn Callback>,
}

impl Filter {
    pub(crate) fn new(predicate: Box<dyn Predicate>, callback: Arc<dyn Callback>) -> Self {
        Self {
            id: FilterId::new(),
            predicate,
            callback,
        }
    }

    /// The filter id.
    #[must_use]
    pub const fn id(&self) -> FilterId {
        self.id
    }

    pub(crate) fn predicate(&self) -> &dyn Predicate {
        self.predicate.as_ref()
    }

    pub(crate) fn callback(&self) -> Arc<dyn Callback> {
        Arc::clone(&self.callback)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Caller-side reference to a registered filter, used only for removal.
///
/// The registry owns the filter; the handle does not keep it alive.
#[derive(Debug, Clone)]
pub struct FilterHandle {
    id: FilterId,
    filter: Weak<Filter>,
}

impl FilterHandle {
    pub(crate) fn new(filter: &Arc<Filter>) -> Self {
        Self {
            id: filter.id(),
            filter: Arc::downgrade(filter),
        }
    }

    /// The filter id.
    #[must_use]
    pub const fn id(&self) -> FilterId {
        self.id
    }

    /// Returns true while the registry still holds the filter.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.filter.strong_count() > 0
    }
}

/// Anything that identifies a registered filter.
pub trait AsFilterId {
    /// The id of the underlying registry entry.
    fn filter_id(&self) -> FilterId;
}

impl AsFilterId for FilterId {
    fn filter_id(&self) -> FilterId {
        *self
    }
}

impl AsFilterId for FilterHandle {
    fn filter_id(&self) -> FilterId {
        self.id
    }
}

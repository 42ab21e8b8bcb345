//! Event handlers invoked by the listener's background threads.
//!
//! Every handler has a default that logs through `tracing`. Handlers are
//! user code running on the producer or consumer thread; a panicking handler
//! is contained and logged so it cannot take the thread down.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{panic_message, CallbackError, ListenerError};
use crate::filter::Callback;
use crate::token::Token;

/// Receives a diagnostic message.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;
/// Receives errors raised on the background threads.
pub type ExceptionHandler = Arc<dyn Fn(&ListenerError) + Send + Sync>;
/// Receives tokens no filter matched.
pub type TokenHandler = Arc<dyn Fn(&Token) + Send + Sync>;

/// The listener's event sinks.
#[derive(Clone)]
pub struct Handlers {
    info: MessageHandler,
    debug: MessageHandler,
    warning: MessageHandler,
    exception: ExceptionHandler,
    default_token: Option<TokenHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            info: Arc::new(|msg: &str| tracing::info!(target: "serial_listener", "{msg}")),
            debug: Arc::new(|msg: &str| tracing::debug!(target: "serial_listener", "{msg}")),
            warning: Arc::new(|msg: &str| tracing::warn!(target: "serial_listener", "{msg}")),
            exception: Arc::new(|err: &ListenerError| {
                tracing::error!(
                    target: "serial_listener",
                    filter = ?err.filter(),
                    %err,
                    "unhandled listener error"
                );
            }),
            default_token: None,
        }
    }
}

impl Handlers {
    /// Replaces the info handler.
    #[must_use]
    pub fn on_info(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.info = Arc::new(f);
        self
    }

    /// Replaces the debug handler.
    #[must_use]
    pub fn on_debug(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug = Arc::new(f);
        self
    }

    /// Replaces the warning handler.
    #[must_use]
    pub fn on_warning(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.warning = Arc::new(f);
        self
    }

    /// Replaces the handler for errors raised on the background threads.
    #[must_use]
    pub fn on_exception(mut self, f: impl Fn(&ListenerError) + Send + Sync + 'static) -> Self {
        self.exception = Arc::new(f);
        self
    }

    /// Sets a handler for tokens that match no filter. Runs on the consumer thread.
    #[must_use]
    pub fn on_default_token(mut self, f: impl Fn(&Token) + Send + Sync + 'static) -> Self {
        self.default_token = Some(Arc::new(f));
        self
    }

    pub(crate) fn info(&self, msg: &str) {
        contain("info", || (self.info)(msg));
    }

    pub(crate) fn debug(&self, msg: &str) {
        contain("debug", || (self.debug)(msg));
    }

    pub(crate) fn warning(&self, msg: &str) {
        contain("warning", || (self.warning)(msg));
    }

    pub(crate) fn exception(&self, err: &ListenerError) {
        contain("exception", || (self.exception)(err));
    }

    /// The default token handler as a dispatchable callback.
    pub(crate) fn default_callback(&self) -> Option<Arc<dyn Callback>> {
        self.default_token
            .as_ref()
            .map(|h| Arc::new(DefaultTokenCallback(Arc::clone(h))) as Arc<dyn Callback>)
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("default_token", &self.default_token.is_some())
            .finish_non_exhaustive()
    }
}

fn contain(kind: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            target: "serial_listener",
            handler = kind,
            panic = %panic_message(payload.as_ref()),
            "listener handler panicked"
        );
    }
}

struct DefaultTokenCallback(TokenHandler);

impl Callback for DefaultTokenCallback {
    fn call(&self, token: &Token) -> Result<(), CallbackError> {
        (self.0)(token);
        Ok(())
    }
}

//! Error types for the serial listener.
//!
//! All errors are strongly typed using thiserror. Configuration errors are
//! returned synchronously to callers; device, callback and predicate failures
//! happen on the background threads and are routed to the listener's
//! exception handler instead of escaping those threads.

use thiserror::Error;

use crate::filter::FilterId;

/// Errors reported synchronously by the public listener operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Already listening")]
    AlreadyListening,

    #[error("Listener is still stopping")]
    StopInProgress,

    #[error("Byte source is not open")]
    SourceNotOpen,

    #[error("Buffer capacity must be at least 1, got {capacity}")]
    InvalidCapacity {
        capacity: usize,
    },

    #[error("Invalid listener configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised by a byte source.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device is not open")]
    NotOpen,

    #[error("Device disconnected: {message}")]
    Disconnected {
        message: String,
    },

    #[error("Read failed: {message}")]
    ReadFailed {
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by a fallible filter callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Creates a callback error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Top-level error type for the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// `filter` is `None` for the default token handler.
    #[error("Callback failed: {source}")]
    Callback {
        filter: Option<FilterId>,
        source: CallbackError,
    },

    #[error("Callback panicked: {message}")]
    CallbackPanicked {
        filter: Option<FilterId>,
        message: String,
    },

    #[error("Predicate of filter {filter} panicked: {message}")]
    PredicatePanicked {
        filter: FilterId,
        message: String,
    },

    #[error("Tokenizer panicked: {message}")]
    TokenizerPanicked {
        message: String,
    },

    #[error("Failed to spawn listener thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ListenerError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is a device error.
    #[must_use]
    pub const fn is_device(&self) -> bool {
        matches!(self, Self::Device(_))
    }

    /// Returns true if this error came from user callback code.
    #[must_use]
    pub const fn is_callback(&self) -> bool {
        matches!(self, Self::Callback { .. } | Self::CallbackPanicked { .. })
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. } | Self::Spawn(_))
    }

    /// The filter whose user code raised this error, if any.
    #[must_use]
    pub const fn filter(&self) -> Option<FilterId> {
        match self {
            Self::Callback { filter, .. } | Self::CallbackPanicked { filter, .. } => *filter,
            Self::PredicatePanicked { filter, .. } => Some(*filter),
            _ => None,
        }
    }
}

/// Result type alias for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;

pub(crate) fn lock_err(context: &'static str) -> ListenerError {
    ListenerError::internal(format!("poisoned lock: {context}"))
}

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

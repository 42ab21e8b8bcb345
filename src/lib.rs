//! # serial-listener - Background tokenizing listener for byte streams
//!
//! Reads a character-oriented byte stream (typically a serial port) on a
//! background thread, splits it into tokens, and dispatches each token to
//! every registered filter whose predicate matches. Callbacks run on a
//! second thread, so a slow callback never stalls the reader.
//!
//! ## Core Concepts
//!
//! - **Token**: One complete unit of text cut from the stream
//! - **Tokenizer**: Splits accumulated text into tokens plus an unfinished remainder
//! - **Filter**: A (predicate, callback) pair evaluated in registration order
//! - **BlockingFilter**: Hands the next match to a thread waiting for it
//! - **BufferedFilter**: Keeps the most recent matches for batch draining
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use serial_listener::{predicates, ChannelSource, Infallible, Listener};
//!
//! let listener = Listener::new();
//! let (source, feeder) = ChannelSource::pair(Duration::from_millis(10));
//!
//! listener.create_filter(predicates::exactly("PING"), Infallible(|t: &_| println!("{t}")))?;
//! let ready = listener.create_blocking_filter(predicates::starts_with("READY"))?;
//!
//! listener.start_listening(source)?;
//! feeder.send(b"PING\rREADY 1\r".to_vec());
//! let token = ready.wait(Duration::from_secs(1));
//! listener.stop_listening()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatch;
pub mod error;
pub mod filter;
pub mod listener;
pub mod source;
pub mod token;
pub mod tokenizer;

// Re-export primary types at crate root for convenience
pub use dispatch::{Dispatch, DispatchQueue};
pub use error::{CallbackError, ConfigError, DeviceError, ListenerError, ListenerResult};
pub use filter::{
    predicates, AsFilterId, BlockingFilter, BufferedFilter, Callback, FilterHandle, FilterId,
    FilterRegistry, Infallible, Predicate,
};
pub use listener::{
    Handlers, Listener, ListenerBuilder, ListenerConfig, ListenerState, ListenerStats,
};
pub use source::{ByteSource, ChannelFeeder, ChannelSource, ReaderSource};
pub use token::Token;
pub use tokenizer::{DelimiterTokenizer, RegexTokenizer, Tokenized, Tokenizer};

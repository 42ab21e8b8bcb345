//! Listener engine.
//!
//! `start_listening` spawns two threads: a producer that reads and tokenizes
//! the byte source and queues matches, and a consumer that invokes the
//! matched callbacks. `stop_listening` joins both, then clears the
//! accumulation buffer, the dispatch queue and every filter.
//!
//! The producer never holds the registry lock while reading or while running
//! predicates, and the consumer never holds it while running callbacks, so
//! user code may register and remove filters from inside a callback.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use crate::dispatch::runner::CallbackRunner;
use crate::dispatch::DispatchQueue;
use crate::error::{lock_err, ConfigError, DeviceError, ListenerError, ListenerResult};
use crate::filter::{
    AsFilterId, BlockingFilter, BufferedFilter, Callback, FilterHandle, FilterRegistry, Predicate,
};
use crate::source::ByteSource;
use crate::tokenizer::{DelimiterTokenizer, Tokenizer};

/// Listener configuration.
pub mod config;
/// Event handlers and their logging defaults.
pub mod handlers;
pub(crate) mod producer;
/// Cumulative counters.
pub mod stats;

pub use config::ListenerConfig;
pub use handlers::Handlers;
pub use stats::ListenerStats;

use stats::Counters;

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    /// No threads running.
    Idle,
    /// Producer and consumer running.
    Listening,
    /// Threads are exiting; either `stop_listening` is joining them or the
    /// byte source failed and they await `stop_listening`.
    Stopping,
}

impl ListenerState {
    const fn bits(self) -> u64 {
        match self {
            Self::Idle => 0,
            Self::Listening => 1,
            Self::Stopping => 2,
        }
    }

    const fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            1 => Self::Listening,
            2 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

/// State and session number packed into one word.
///
/// Worker threads run only while the word equals their own
/// `(session, Listening)`, so threads from an earlier session can never be
/// revived by a later `start_listening`.
#[derive(Debug, Default)]
struct Lifecycle(AtomicU64);

impl Lifecycle {
    const fn pack(session: u64, state: ListenerState) -> u64 {
        (session << 2) | state.bits()
    }

    fn state(&self) -> ListenerState {
        ListenerState::from_bits(self.0.load(Ordering::Acquire))
    }

    fn session(&self) -> u64 {
        self.0.load(Ordering::Acquire) >> 2
    }

    fn set(&self, state: ListenerState) {
        self.0.store(Self::pack(self.session(), state), Ordering::Release);
    }

    fn begin_session(&self) -> u64 {
        let session = self.session() + 1;
        self.0
            .store(Self::pack(session, ListenerState::Listening), Ordering::Release);
        session
    }

    fn is_active(&self, session: u64) -> bool {
        self.0.load(Ordering::Acquire) == Self::pack(session, ListenerState::Listening)
    }

    fn begin_stopping(&self, session: u64) -> bool {
        self.0
            .compare_exchange(
                Self::pack(session, ListenerState::Listening),
                Self::pack(session, ListenerState::Stopping),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// State shared between the public handle and the worker threads.
pub(crate) struct Shared {
    lifecycle: Lifecycle,
    config: ListenerConfig,
    registry: Arc<FilterRegistry>,
    queue: DispatchQueue,
    tokenizer: RwLock<Arc<dyn Tokenizer>>,
    handlers: Handlers,
    default_callback: Option<Arc<dyn Callback>>,
    counters: Counters,
    device_error: Mutex<Option<DeviceError>>,
}

impl Shared {
    pub(crate) fn is_listening(&self) -> bool {
        self.lifecycle.state() == ListenerState::Listening
    }

    pub(crate) fn tokenizer(&self) -> ListenerResult<Arc<dyn Tokenizer>> {
        let tokenizer = self.tokenizer.read().map_err(|_| lock_err("listener.tokenizer"))?;
        Ok(Arc::clone(&tokenizer))
    }

    pub(crate) fn read_size(&self) -> ListenerResult<usize> {
        let chunk = self.config.chunk_size;
        if !self.config.adaptive_reads {
            return Ok(chunk);
        }
        Ok(chunk.max(self.registry.longest_pattern_hint()?))
    }

    pub(crate) fn record_device_error(&self, err: DeviceError) {
        if let Ok(mut slot) = self.device_error.lock() {
            *slot = Some(err);
        }
    }
}

thread_local! {
    /// Address of the `Shared` a worker thread serves, 0 on other threads.
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

fn mark_worker(shared: &Arc<Shared>) {
    WORKER_OF.with(|w| w.set(Arc::as_ptr(shared) as usize));
}

struct Workers {
    session: u64,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// Assembles a [`Listener`].
#[derive(Default)]
pub struct ListenerBuilder {
    config: ListenerConfig,
    handlers: Handlers,
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl ListenerBuilder {
    /// Starts from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the thread and read tuning.
    #[must_use]
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event handlers.
    #[must_use]
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Sets the initial tokenizer. Defaults to splitting on `\r`.
    #[must_use]
    pub fn tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Some(Arc::new(tokenizer));
        self
    }

    /// Validates the configuration and builds the listener.
    pub fn build(self) -> ListenerResult<Listener> {
        self.config.validate()?;
        let tokenizer = self
            .tokenizer
            .unwrap_or_else(|| Arc::new(DelimiterTokenizer::default()));
        Ok(Listener::assemble(self.config, self.handlers, tokenizer))
    }
}

/// Reads a byte stream in the background and dispatches matching tokens.
///
/// Dropping a listener stops it.
pub struct Listener {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
    /// Held for the whole of a stop, or of a start that reaps a failed session.
    lifecycle_gate: Mutex<()>,
}

impl Listener {
    /// Creates a listener with default configuration, logging handlers and
    /// a `\r` delimiter tokenizer.
    #[must_use]
    pub fn new() -> Self {
        Self::assemble(
            ListenerConfig::default(),
            Handlers::default(),
            Arc::new(DelimiterTokenizer::default()),
        )
    }

    fn assemble(config: ListenerConfig, handlers: Handlers, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Lifecycle::default(),
                config,
                registry: Arc::new(FilterRegistry::new()),
                queue: DispatchQueue::new(),
                tokenizer: RwLock::new(tokenizer),
                default_callback: handlers.default_callback(),
                handlers,
                counters: Counters::default(),
                device_error: Mutex::new(None),
            }),
            workers: Mutex::new(None),
            lifecycle_gate: Mutex::new(()),
        }
    }

    /// Starts assembling a listener.
    #[must_use]
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::new()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.shared.lifecycle.state()
    }

    /// Returns true while the worker threads are running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.shared.is_listening()
    }

    /// The configuration this listener was built with.
    #[must_use]
    pub fn config(&self) -> &ListenerConfig {
        &self.shared.config
    }

    /// Starts reading `source` on background threads.
    ///
    /// Fails with [`ConfigError::AlreadyListening`] if already started and
    /// with [`ConfigError::SourceNotOpen`] if the source is closed; the
    /// listener is left unchanged in both cases. Threads left behind by a
    /// byte-source failure are reaped first.
    pub fn start_listening<S: ByteSource + 'static>(&self, source: S) -> ListenerResult<()> {
        let Some(_gate) = self.enter_gate() else {
            return Err(ConfigError::StopInProgress.into());
        };

        let failed_session = {
            let mut workers = self.workers.lock().map_err(|_| lock_err("listener.workers"))?;
            match self.state() {
                ListenerState::Listening => return Err(ConfigError::AlreadyListening.into()),
                ListenerState::Stopping if workers.is_none() => {
                    return Err(ConfigError::StopInProgress.into());
                }
                _ => {}
            }
            if !source.is_open() {
                return Err(ConfigError::SourceNotOpen.into());
            }
            workers.take()
        };
        if let Some(workers) = failed_session {
            self.reap(workers);
            self.shared.queue.clear();
            self.shared.lifecycle.set(ListenerState::Idle);
        }

        let mut workers = self.workers.lock().map_err(|_| lock_err("listener.workers"))?;
        if workers.is_some() || self.state() != ListenerState::Idle {
            return Err(ConfigError::AlreadyListening.into());
        }

        let session = self.shared.lifecycle.begin_session();
        let name = &self.shared.config.thread_name;

        let shared = Arc::clone(&self.shared);
        let producer = thread::Builder::new()
            .name(format!("{name}-producer"))
            .spawn(move || {
                mark_worker(&shared);
                producer::run(&shared, &source, session);
            })
            .map_err(|e| {
                self.shared.lifecycle.set(ListenerState::Idle);
                ListenerError::Spawn(e)
            })?;

        let shared = Arc::clone(&self.shared);
        let consumer = thread::Builder::new()
            .name(format!("{name}-consumer"))
            .spawn(move || {
                mark_worker(&shared);
                let runner = CallbackRunner {
                    queue: &shared.queue,
                    registry: &shared.registry,
                    handlers: &shared.handlers,
                    counters: &shared.counters,
                    poll_interval: shared.config.poll_interval(),
                };
                runner.run(|| shared.lifecycle.is_active(session));
            });
        let consumer = match consumer {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.lifecycle.set(ListenerState::Stopping);
                let _ = producer.join();
                self.shared.lifecycle.set(ListenerState::Idle);
                return Err(ListenerError::Spawn(e));
            }
        };

        *workers = Some(Workers {
            session,
            producer,
            consumer,
        });
        self.shared.handlers.info("listening started");
        Ok(())
    }

    /// Stops both threads and waits for them to exit, then clears the
    /// accumulation buffer, the dispatch queue and all filters.
    ///
    /// A no-op when not listening. Blocks until a callback that is running
    /// returns, and until a stop already under way on another thread has
    /// finished. When called from inside a callback, the consumer thread is
    /// not joined; it exits as soon as the callback returns.
    pub fn stop_listening(&self) -> ListenerResult<()> {
        // A worker cannot wait on a stop that is joining it.
        let Some(_gate) = self.enter_gate() else {
            return Ok(());
        };

        let workers = {
            let mut guard = self.workers.lock().map_err(|_| lock_err("listener.workers"))?;
            let Some(workers) = guard.take() else {
                return Ok(());
            };
            self.shared.lifecycle.set(ListenerState::Stopping);
            workers
        };

        let session = workers.session;
        self.reap(workers);
        self.shared.queue.clear();
        let cleared = self.shared.registry.clear();
        self.shared.lifecycle.set(ListenerState::Idle);
        self.shared
            .handlers
            .debug(&format!("listening session {session} stopped"));
        self.shared.handlers.info("listening stopped");
        cleared.map(|_| ())
    }

    /// Serializes start and stop. Worker threads only try the gate: the
    /// holder may be joining them. `None` means a worker found it taken.
    fn enter_gate(&self) -> Option<MutexGuard<'_, ()>> {
        let on_worker = WORKER_OF.with(|w| w.get() == Arc::as_ptr(&self.shared) as usize);
        if !on_worker {
            return Some(self.lifecycle_gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
        match self.lifecycle_gate.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn reap(&self, workers: Workers) {
        let current = thread::current().id();
        for (role, handle) in [("producer", workers.producer), ("consumer", workers.consumer)] {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                self.shared
                    .handlers
                    .exception(&ListenerError::internal(format!("{role} thread panicked")));
            }
        }
    }

    /// Registers a filter. Its callback runs on the consumer thread for every
    /// later token `predicate` matches.
    pub fn create_filter<P, C>(&self, predicate: P, callback: C) -> ListenerResult<FilterHandle>
    where
        P: Predicate + 'static,
        C: Callback + 'static,
    {
        self.shared.registry.register(Box::new(predicate), Arc::new(callback))
    }

    /// Registers a filter whose matches can be awaited one at a time.
    pub fn create_blocking_filter<P>(&self, predicate: P) -> ListenerResult<BlockingFilter>
    where
        P: Predicate + 'static,
    {
        BlockingFilter::register(Arc::clone(&self.shared.registry), Box::new(predicate))
    }

    /// Registers a filter collecting up to `capacity` of its most recent matches.
    pub fn create_buffered_filter<P>(
        &self,
        predicate: P,
        capacity: usize,
    ) -> ListenerResult<BufferedFilter>
    where
        P: Predicate + 'static,
    {
        BufferedFilter::register(Arc::clone(&self.shared.registry), Box::new(predicate), capacity)
    }

    /// Removes a filter. Matches already queued are still delivered.
    ///
    /// Returns false if the filter was already removed.
    pub fn remove_filter(&self, filter: &impl AsFilterId) -> ListenerResult<bool> {
        self.shared.registry.remove(filter.filter_id())
    }

    /// Removes every filter and drops all queued matches.
    ///
    /// Returns the number of filters removed.
    pub fn remove_all_filters(&self) -> ListenerResult<usize> {
        let removed = self.shared.registry.clear()?;
        self.shared.queue.clear();
        Ok(removed)
    }

    /// Number of registered filters.
    pub fn filter_count(&self) -> ListenerResult<usize> {
        self.shared.registry.len()
    }

    /// Replaces the tokenizer. Applies from the next read cycle; the current
    /// remainder is handed to the new tokenizer.
    pub fn set_tokenizer(&self, tokenizer: impl Tokenizer + 'static) -> ListenerResult<()> {
        let mut slot = self
            .shared
            .tokenizer
            .write()
            .map_err(|_| lock_err("listener.set_tokenizer"))?;
        *slot = Arc::new(tokenizer);
        Ok(())
    }

    /// Matches queued but not yet delivered.
    #[must_use]
    pub fn pending_dispatches(&self) -> usize {
        self.shared.queue.len()
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        self.shared.counters.snapshot()
    }

    /// Takes the error that ended the last session, if the byte source failed.
    pub fn take_device_error(&self) -> Option<DeviceError> {
        self.shared.device_error.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .field("pending_dispatches", &self.pending_dispatches())
            .finish_non_exhaustive()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.stop_listening();
    }
}

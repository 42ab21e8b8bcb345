//! Byte sources the listener reads from.
//!
//! Device setup (port open, baud rate, parity, read timeouts) belongs to the
//! source implementation. The listener only needs [`ByteSource::is_open`] and
//! a bounded-wait [`ByteSource::read`].

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::DeviceError;

/// A character-oriented byte stream.
///
/// Methods take `&self` so the caller can keep writing to the device (through
/// its own handle) while the listener reads from a shared one.
pub trait ByteSource: Send + Sync {
    /// Returns true while the device can be read.
    fn is_open(&self) -> bool;

    /// Reads up to `max_bytes`.
    ///
    /// Blocks for at most the source's own timeout and may return fewer bytes
    /// than requested, or none. Fails if the device is gone.
    fn read(&self, max_bytes: usize) -> Result<Vec<u8>, DeviceError>;
}

impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read(&self, max_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        (**self).read(max_bytes)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read(&self, max_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        (**self).read(max_bytes)
    }
}

/// An in-process byte source fed through a channel.
///
/// Useful for tests and for bridging sources that push data (callbacks,
/// async tasks) into the listener. Dropping every [`ChannelFeeder`] reports a
/// disconnect once the already-sent bytes have been read.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<Vec<u8>>,
    pending: Mutex<VecDeque<u8>>,
    read_timeout: Duration,
    open: AtomicBool,
}

/// Sending half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct ChannelFeeder {
    tx: Sender<Vec<u8>>,
}

impl ChannelSource {
    /// Creates a connected source/feeder pair. `read_timeout` bounds each read.
    #[must_use]
    pub fn pair(read_timeout: Duration) -> (Self, ChannelFeeder) {
        let (tx, rx) = unbounded();
        let source = Self {
            rx,
            pending: Mutex::new(VecDeque::new()),
            read_timeout,
            open: AtomicBool::new(true),
        };
        (source, ChannelFeeder { tx })
    }

    /// Marks the source closed. Subsequent reads fail with [`DeviceError::NotOpen`].
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl ByteSource for ChannelSource {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn read(&self, max_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| DeviceError::ReadFailed {
                message: "poisoned lock: channel_source.pending".to_string(),
            })?;

        if pending.is_empty() {
            match self.rx.recv_timeout(self.read_timeout) {
                Ok(bytes) => pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
                Err(RecvTimeoutError::Disconnected) => {
                    self.open.store(false, Ordering::Release);
                    return Err(DeviceError::Disconnected {
                        message: "channel feeder dropped".to_string(),
                    });
                }
            }
        }

        let take = max_bytes.min(pending.len());
        Ok(pending.drain(..take).collect())
    }
}

impl ChannelFeeder {
    /// Queues bytes for the listener. Fails once the source has been dropped.
    pub fn send(&self, bytes: impl AsRef<[u8]>) -> Result<(), DeviceError> {
        self.tx
            .send(bytes.as_ref().to_vec())
            .map_err(|_| DeviceError::Disconnected {
                message: "channel source dropped".to_string(),
            })
    }
}

/// Adapts any [`Read`] implementation (a serial port handle, a pipe, a socket
/// with a read timeout) into a [`ByteSource`].
///
/// Timeouts (`WouldBlock`, `TimedOut`) and interrupted reads yield zero bytes.
/// End of stream is reported as a disconnect.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: Mutex<R>,
    open: AtomicBool,
}

impl<R: Read + Send> ReaderSource<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
            open: AtomicBool::new(true),
        }
    }

    /// Unwraps the reader.
    pub fn into_inner(self) -> R {
        match self.reader.into_inner() {
            Ok(reader) => reader,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<R: Read + Send> ByteSource for ReaderSource<R> {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn read(&self, max_bytes: usize) -> Result<Vec<u8>, DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }

        let mut reader = self.reader.lock().map_err(|_| DeviceError::ReadFailed {
            message: "poisoned lock: reader_source.reader".to_string(),
        })?;

        let mut buf = vec![0u8; max_bytes];
        match reader.read(&mut buf) {
            Ok(0) if max_bytes > 0 => {
                self.open.store(false, Ordering::Release);
                Err(DeviceError::Disconnected {
                    message: "end of stream".to_string(),
                })
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(DeviceError::Io(e)),
        }
    }
}

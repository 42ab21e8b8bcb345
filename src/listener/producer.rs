//! Producer side: reads the byte source, tokenizes, and queues matches.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::dispatch::Dispatch;
use crate::error::{panic_message, DeviceError, ListenerError, ListenerResult};
use crate::source::ByteSource;
use crate::token::Token;
use crate::tokenizer::Tokenizer;

use super::stats::Counters;
use super::Shared;

/// Accumulation buffer, owned by the producer thread alone.
///
/// Bytes are decoded as UTF-8 as they arrive. An incomplete trailing
/// sequence waits for the next read; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Accumulator {
    undecoded: Vec<u8>,
    text: String,
    next_ordinal: u64,
}

impl Accumulator {
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.undecoded.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(s) => {
                    self.text.push_str(s);
                    self.undecoded.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(s) = std::str::from_utf8(&self.undecoded[..valid]) {
                        self.text.push_str(s);
                    }
                    match e.error_len() {
                        // Truncated sequence at the end: keep it for the next read.
                        None => {
                            self.undecoded.drain(..valid);
                            return;
                        }
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Runs the tokenizer over the buffer and keeps its remainder.
    pub fn tokenize(&mut self, tokenizer: &dyn Tokenizer) -> ListenerResult<Vec<Token>> {
        let text = &self.text;
        let out = match catch_unwind(AssertUnwindSafe(|| tokenizer.tokenize(text))) {
            Ok(out) => out,
            Err(payload) => {
                // The buffer would make the tokenizer panic again on every read.
                self.text.clear();
                return Err(ListenerError::TokenizerPanicked {
                    message: panic_message(payload.as_ref()),
                });
            }
        };

        self.text = out.remainder;
        Ok(out
            .tokens
            .into_iter()
            .map(|text| {
                let token = Token::new(text, self.next_ordinal);
                self.next_ordinal += 1;
                token
            })
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.undecoded.is_empty()
    }
}

/// Producer loop. Returns when `session` ends or the source fails.
pub(crate) fn run(shared: &Shared, source: &dyn ByteSource, session: u64) {
    let mut acc = Accumulator::default();
    while shared.lifecycle.is_active(session) {
        if let Err(err) = cycle(shared, source, &mut acc) {
            fail(shared, err, session);
            break;
        }
    }
}

fn cycle(shared: &Shared, source: &dyn ByteSource, acc: &mut Accumulator) -> ListenerResult<()> {
    if !source.is_open() {
        return Err(DeviceError::NotOpen.into());
    }

    let bytes = source.read(shared.read_size()?)?;
    if bytes.is_empty() {
        return Ok(());
    }
    Counters::add(&shared.counters.bytes_read, bytes.len() as u64);

    acc.push_bytes(&bytes);
    let tokenizer = shared.tokenizer()?;
    let tokens = match acc.tokenize(tokenizer.as_ref()) {
        Ok(tokens) => tokens,
        Err(err) => {
            shared.handlers.exception(&err);
            return Ok(());
        }
    };

    for token in tokens {
        Counters::add(&shared.counters.tokens, 1);
        dispatch_token(shared, token)?;
    }
    Ok(())
}

/// Queues every match for `token` before returning, so matches for one token
/// always precede matches for the next.
fn dispatch_token(shared: &Shared, token: Token) -> ListenerResult<()> {
    let sweep = shared.registry.snapshot_match(&token, |err| {
        Counters::add(&shared.counters.predicate_failures, 1);
        shared.handlers.warning(&err.to_string());
    })?;

    if sweep.matched.is_empty() {
        if let Some(callback) = &shared.default_callback {
            shared
                .queue
                .push(Dispatch::new(None, sweep.epoch, token, Arc::clone(callback)));
            Counters::add(&shared.counters.dispatched, 1);
        }
        return Ok(());
    }

    for filter in sweep.matched {
        shared.queue.push(Dispatch::new(
            Some(filter.id()),
            sweep.epoch,
            token.clone(),
            filter.callback(),
        ));
        Counters::add(&shared.counters.dispatched, 1);
    }
    Ok(())
}

fn fail(shared: &Shared, err: ListenerError, session: u64) {
    shared.handlers.exception(&err);
    if let ListenerError::Device(device) = err {
        shared.record_device_error(device);
    }
    if shared.lifecycle.begin_stopping(session) {
        shared.handlers.warning("byte source failed, listener stopping");
    }
}

//! Tokenizer strategies.
//!
//! A tokenizer splits the accumulated buffer (previous remainder plus newly
//! read text) into complete tokens and an unconsumed remainder. The listener
//! calls it once per read cycle and keeps only the remainder, so a tokenizer
//! must be deterministic and must never report a fragment that more input
//! could still extend.

use std::fmt;

use regex::Regex;

use crate::error::ConfigError;

/// Output of a single tokenizer pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokenized {
    /// Completed tokens in stream order.
    pub tokens: Vec<String>,
    /// Trailing text that does not form a complete token yet.
    pub remainder: String,
}

/// Splits an accumulated buffer into completed tokens plus a remainder.
pub trait Tokenizer: Send + Sync {
    /// Tokenizes `buffer`. Must be side-effect free.
    fn tokenize(&self, buffer: &str) -> Tokenized;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Tokenized + Send + Sync,
{
    fn tokenize(&self, buffer: &str) -> Tokenized {
        self(buffer)
    }
}

/// Splits on a fixed delimiter sequence.
///
/// The fragment after the last delimiter is the remainder. With no delimiter
/// in the buffer, zero tokens are produced and the whole buffer is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimiterTokenizer {
    delimiter: String,
    skip_empty: bool,
}

impl DelimiterTokenizer {
    /// Creates a tokenizer splitting on `delimiter`.
    pub fn new(delimiter: impl Into<String>) -> Result<Self, ConfigError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(ConfigError::InvalidConfig {
                reason: "tokenizer delimiter cannot be empty".to_string(),
            });
        }
        Ok(Self {
            delimiter,
            skip_empty: false,
        })
    }

    /// Drops empty tokens, e.g. those between back-to-back delimiters.
    #[must_use]
    pub fn skip_empty(mut self) -> Self {
        self.skip_empty = true;
        self
    }

    /// The delimiter sequence.
    #[must_use]
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }
}

impl Default for DelimiterTokenizer {
    fn default() -> Self {
        Self {
            delimiter: "\r".to_string(),
            skip_empty: false,
        }
    }
}

impl Tokenizer for DelimiterTokenizer {
    fn tokenize(&self, buffer: &str) -> Tokenized {
        // Left to right only, so a self-overlapping delimiter such as "\r\r"
        // splits the same way however the input was chunked.
        let mut parts: Vec<&str> = buffer.split(self.delimiter.as_str()).collect();
        let remainder = parts.pop().unwrap_or_default();

        let tokens = parts
            .into_iter()
            .filter(|t| !(self.skip_empty && t.is_empty()))
            .map(str::to_string)
            .collect();

        Tokenized {
            tokens,
            remainder: remainder.to_string(),
        }
    }
}

/// Splits on every match of a delimiter regex.
///
/// Chunk boundaries are only safe for delimiters where no match is a prefix
/// of a longer match: `\r\n` is fine, `\r\n|\r` is not, since a read ending
/// between the two bytes would split on the lone `\r`.
#[derive(Clone)]
pub struct RegexTokenizer {
    delimiter: Regex,
}

impl RegexTokenizer {
    /// Creates a tokenizer from a delimiter pattern.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let delimiter = Regex::new(pattern).map_err(|e| ConfigError::InvalidConfig {
            reason: format!("invalid delimiter pattern: {e}"),
        })?;
        Self::from_regex(delimiter)
    }

    /// Wraps a compiled delimiter regex. Rejects patterns matching the empty string.
    pub fn from_regex(delimiter: Regex) -> Result<Self, ConfigError> {
        if delimiter.is_match("") {
            return Err(ConfigError::InvalidConfig {
                reason: format!(
                    "delimiter pattern '{}' matches the empty string",
                    delimiter.as_str()
                ),
            });
        }
        Ok(Self { delimiter })
    }
}

impl fmt::Debug for RegexTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexTokenizer")
            .field("delimiter", &self.delimiter.as_str())
            .finish()
    }
}

impl Tokenizer for RegexTokenizer {
    fn tokenize(&self, buffer: &str) -> Tokenized {
        let mut tokens = Vec::new();
        let mut start = 0;
        for m in self.delimiter.find_iter(buffer) {
            tokens.push(buffer[start..m.start()].to_string());
            start = m.end();
        }
        Tokenized {
            tokens,
            remainder: buffer[start..].to_string(),
        }
    }
}

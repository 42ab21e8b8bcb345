//! Common token predicates.
//!
//! Literal predicates report their pattern length so the listener can size
//! reads to at least the shortest token a filter is waiting for.

use std::fmt;

use regex::Regex;

use super::Predicate;
use crate::token::Token;

/// Matches tokens beginning with a prefix.
#[derive(Debug, Clone)]
pub struct StartsWith(String);

/// Matches tokens ending with a suffix.
#[derive(Debug, Clone)]
pub struct EndsWith(String);

/// Matches tokens containing a substring.
#[derive(Debug, Clone)]
pub struct Contains(String);

/// Matches tokens equal to a literal.
#[derive(Debug, Clone)]
pub struct Exactly(String);

/// Matches tokens the regex finds a match in.
#[derive(Clone)]
pub struct Matching(Regex);

/// Matches every token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Any;

/// Tokens starting with `prefix`.
#[must_use]
pub fn starts_with(prefix: impl Into<String>) -> StartsWith {
    StartsWith(prefix.into())
}

/// Tokens ending with `suffix`.
#[must_use]
pub fn ends_with(suffix: impl Into<String>) -> EndsWith {
    EndsWith(suffix.into())
}

/// Tokens containing `needle`.
#[must_use]
pub fn contains(needle: impl Into<String>) -> Contains {
    Contains(needle.into())
}

/// Tokens equal to `literal`.
#[must_use]
pub fn exactly(literal: impl Into<String>) -> Exactly {
    Exactly(literal.into())
}

/// Tokens matched by `regex`. Anchor the pattern to match whole tokens.
#[must_use]
pub fn matching(regex: Regex) -> Matching {
    Matching(regex)
}

/// Every token.
#[must_use]
pub const fn any() -> Any {
    Any
}

impl Predicate for StartsWith {
    fn matches(&self, token: &Token) -> bool {
        token.starts_with(self.0.as_str())
    }

    fn pattern_len_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

impl Predicate for EndsWith {
    fn matches(&self, token: &Token) -> bool {
        token.ends_with(self.0.as_str())
    }

    fn pattern_len_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

impl Predicate for Contains {
    fn matches(&self, token: &Token) -> bool {
        token.contains(self.0.as_str())
    }

    fn pattern_len_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

impl Predicate for Exactly {
    fn matches(&self, token: &Token) -> bool {
        token.as_str() == self.0
    }

    fn pattern_len_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

impl Predicate for Matching {
    fn matches(&self, token: &Token) -> bool {
        self.0.is_match(token)
    }
}

impl fmt::Debug for Matching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Matching").field(&self.0.as_str()).finish()
    }
}

impl Predicate for Any {
    fn matches(&self, _token: &Token) -> bool {
        true
    }
}

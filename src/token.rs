//! Tokens extracted from the byte stream.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable unit of text extracted from the stream by the tokenizer.
///
/// Cloning is cheap: the text is shared, so the same token can sit in the
/// dispatch queue for several filters at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    text: Arc<str>,
    /// Position of this token in the stream, counted from zero per listening session.
    pub ordinal: u64,
    /// When the bytes completing this token were read.
    pub received_at: DateTime<Utc>,
}

impl Token {
    /// Creates a token stamped with the current time.
    #[must_use]
    pub fn new(text: impl Into<Arc<str>>, ordinal: u64) -> Self {
        Self {
            text: text.into(),
            ordinal,
            received_at: Utc::now(),
        }
    }

    /// The token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl Deref for Token {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl PartialEq<str> for Token {
    fn eq(&self, other: &str) -> bool {
        &*self.text == other
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        &*self.text == *other
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_derefs_to_text() {
        let token = Token::new("V=12", 3);
        assert!(token.starts_with("V="));
        assert_eq!(token.as_str(), "V=12");
        assert_eq!(token, "V=12");
        assert_eq!(token.ordinal, 3);
        assert_eq!(token.to_string(), "V=12");
    }

    #[test]
    fn clones_share_text() {
        let token = Token::new(String::from("PING"), 0);
        let copy = token.clone();
        assert!(std::ptr::eq(token.as_str(), copy.as_str()));
    }

    #[test]
    fn token_serializes_text_and_ordinal() {
        let token = Token::new("OK", 7);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["text"], "OK");
        assert_eq!(json["ordinal"], 7);
        let back: Token = serde_json::from_value(json).unwrap();
        assert_eq!(back, token);
    }
}

//! Signatures: short, stable keys for one logical operation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque, bounded-length key of a logical operation (a normalized SQL
/// statement, a Redis command, a topic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Signature(Arc<str>);

impl Signature {
    /// Wrap an already-derived key
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Signature(key.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn as_arc(&self) -> &Arc<str> {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Signature {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Signature {
    fn from(key: &str) -> Self {
        Signature(Arc::from(key))
    }
}

/// Maps raw call data to a [`Signature`].
///
/// Implementations must be pure: identical input always yields the same
/// signature, and output length is bounded.
pub trait SignatureDeriver: Send + Sync {
    fn derive(&self, raw: &str) -> Signature;
}

impl<F> SignatureDeriver for F
where
    F: Fn(&str) -> Signature + Send + Sync,
{
    fn derive(&self, raw: &str) -> Signature {
        self(raw)
    }
}

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid string literal pattern"));
static NUMBER_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[+-]?\d+(?:\.\d+)?\b").expect("valid numeric literal pattern")
});
static IN_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\?(?:\s*,\s*\?)*\s*\)").expect("valid in-list pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Default deriver for statement text.
///
/// Collapses whitespace, optionally replaces literals with `?` (collapsing
/// `IN (?, ?, ?)` to `IN (?)`), and truncates to `max_length` bytes on a
/// character boundary.
#[derive(Debug, Clone)]
pub struct SqlCompression {
    max_length: usize,
    mask_literals: bool,
}

impl Default for SqlCompression {
    fn default() -> Self {
        Self::new(1024, true)
    }
}

impl SqlCompression {
    pub fn new(max_length: usize, mask_literals: bool) -> Self {
        Self {
            max_length: max_length.max(1),
            mask_literals,
        }
    }

    pub fn compress(&self, raw: &str) -> String {
        let mut text = WHITESPACE.replace_all(raw.trim(), " ").into_owned();

        if self.mask_literals {
            text = STRING_LITERAL.replace_all(&text, "?").into_owned();
            text = NUMBER_LITERAL.replace_all(&text, "?").into_owned();
            text = IN_LIST.replace_all(&text, "(?)").into_owned();
        }

        truncate_on_char_boundary(&mut text, self.max_length);
        text
    }
}

impl SignatureDeriver for SqlCompression {
    fn derive(&self, raw: &str) -> Signature {
        Signature::new(self.compress(raw))
    }
}

fn truncate_on_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapsed() {
        let deriver = SqlCompression::new(1024, false);
        let sig = deriver.derive("  SELECT *\n\tFROM   orders  ");
        assert_eq!(sig.as_str(), "SELECT * FROM orders");
    }

    #[test]
    fn test_literals_masked() {
        let deriver = SqlCompression::default();
        let a = deriver.derive("SELECT * FROM orders WHERE id = 42 AND name = 'bob'");
        let b = deriver.derive("SELECT * FROM orders WHERE id = 7 AND name = 'it''s'");

        assert_eq!(a.as_str(), "SELECT * FROM orders WHERE id = ? AND name = ?");
        assert_eq!(a, b);
    }

    #[test]
    fn test_in_list_collapsed() {
        let deriver = SqlCompression::default();
        let sig = deriver.derive("DELETE FROM t WHERE id IN (1, 2, 3)");
        assert_eq!(sig.as_str(), "DELETE FROM t WHERE id IN (?)");
    }

    #[test]
    fn test_identifiers_with_digits_survive() {
        let deriver = SqlCompression::default();
        let sig = deriver.derive("SELECT col1 FROM table2");
        assert_eq!(sig.as_str(), "SELECT col1 FROM table2");
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let deriver = SqlCompression::new(5, false);
        let sig = deriver.derive("abcdé");
        assert_eq!(sig.as_str(), "abcd");
        assert!(sig.as_str().len() <= 5);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let deriver = SqlCompression::default();
        let raw = "UPDATE stock SET qty = qty - 1 WHERE sku = 'A-1'";
        assert_eq!(deriver.derive(raw), deriver.derive(raw));
    }

    #[test]
    fn test_closure_deriver() {
        let upper = |raw: &str| Signature::new(raw.to_uppercase());
        assert_eq!(upper.derive("hget").as_str(), "HGET");
    }
}

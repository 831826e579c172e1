//! Address validation and normalization.
//!
//! Syntax only. Deliverability (mailbox existence, MX lookup) is never checked.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Conservative shape check used when the RFC grammar rejects a candidate.
static FALLBACK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("fallback address pattern is valid")
});

/// A syntactically valid contact address with a lowercased domain.
///
/// The local part keeps its original case; compare with [`Address::key`]
/// for uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full lowercase form, used for case-insensitive uniqueness.
    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }

    /// Part after the `@`.
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidAddress {
    #[error("address is empty")]
    Empty,

    #[error("'{0}' is not a valid email address")]
    Malformed(String),
}

/// Validate and normalize a candidate address.
///
/// The RFC 5321 grammar check (via `lettre`) runs first; a candidate it
/// rejects still passes if it matches the conservative fallback pattern.
pub fn validate(candidate: &str) -> Result<Address, InvalidAddress> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(InvalidAddress::Empty);
    }
    // Quoted local parts would otherwise let whitespace through the grammar check.
    if trimmed.contains(char::is_whitespace) {
        return Err(InvalidAddress::Malformed(trimmed.to_string()));
    }

    if let Ok(parsed) = lettre::Address::from_str(trimmed)
        && parsed.domain().contains('.')
    {
        return Ok(normalize_parts(parsed.user(), parsed.domain()));
    }

    if FALLBACK_PATTERN.is_match(trimmed)
        && let Some((local, domain)) = trimmed.rsplit_once('@')
    {
        return Ok(normalize_parts(local, domain));
    }

    Err(InvalidAddress::Malformed(trimmed.to_string()))
}

fn normalize_parts(local: &str, domain: &str) -> Address {
    Address(format!("{local}@{}", domain.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Accepted ────────────────────────────────────────────────────

    #[test]
    fn accepts_plain_address() {
        let addr = validate("alice@example.com").unwrap();
        assert_eq!(addr.as_str(), "alice@example.com");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let addr = validate("  bob@example.org \n").unwrap();
        assert_eq!(addr.as_str(), "bob@example.org");
    }

    #[test]
    fn lowercases_domain_only() {
        let addr = validate("Alice.Smith@Example.COM").unwrap();
        assert_eq!(addr.as_str(), "Alice.Smith@example.com");
        assert_eq!(addr.key(), "alice.smith@example.com");
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["A@X.Com", "first.last+tag@Sub.Domain.io", "x@y.co"] {
            let once = validate(raw).unwrap();
            let twice = validate(once.as_str()).unwrap();
            assert_eq!(once, twice, "{raw}");
        }
    }

    #[test]
    fn fallback_accepts_what_grammar_rejects() {
        // Parentheses are outside the atext set but match the fallback shape.
        let addr = validate("we(ird)@Example.com").unwrap();
        assert_eq!(addr.as_str(), "we(ird)@example.com");
    }

    // ── Rejected ────────────────────────────────────────────────────

    #[test]
    fn rejects_empty_and_blank() {
        assert_eq!(validate(""), Err(InvalidAddress::Empty));
        assert_eq!(validate("   "), Err(InvalidAddress::Empty));
    }

    #[test]
    fn rejects_missing_at() {
        assert!(matches!(
            validate("not-an-email"),
            Err(InvalidAddress::Malformed(_))
        ));
    }

    #[test]
    fn rejects_domain_without_dot() {
        assert!(validate("root@localhost").is_err());
    }

    #[test]
    fn rejects_embedded_whitespace() {
        assert!(validate("first last@example.com").is_err());
    }

    #[test]
    fn rejects_quoted_local_with_space() {
        assert!(matches!(
            validate("\"a b\"@x.com"),
            Err(InvalidAddress::Malformed(_))
        ));
        assert!(validate("\"a\tb\"@x.com").is_err());
    }

    #[test]
    fn rejects_multiple_at_signs() {
        assert!(validate("a@b@example.com").is_err());
    }

    #[test]
    fn rejects_empty_local_part() {
        assert!(validate("@example.com").is_err());
    }
}

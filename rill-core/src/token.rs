//! Resource tokens.
//!
//! A [`Token`] identifies one resource registration inside a scope. It has
//! no behaviour of its own; scopes use it as the key of their release-action
//! table, and `Cancellable` uses it to release a resource early.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identity of one resource acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    /// Mint a fresh token.
    pub fn new() -> Self {
        Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// Global token counter.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

//! Interruption signals.
//!
//! Interruption is cooperative: the interpreter observes an
//! [`InterruptToken`] at its suspension points (before running an `Eval` or
//! `Acquire`, and when resumed after an `Output`). The signal itself can be
//! raised from any thread through the owning [`InterruptSource`].
//!
//! # Example
//!
//! ```rust
//! use rill_core::interrupt::InterruptSource;
//!
//! let source = InterruptSource::new();
//! let token = source.token();
//!
//! std::thread::spawn(move || source.interrupt_with_reason("shutdown"))
//!     .join()
//!     .unwrap();
//!
//! assert!(token.is_interrupted());
//! assert_eq!(token.reason().as_deref(), Some("shutdown"));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Shared state behind a source and its tokens.
#[derive(Debug, Default)]
struct InterruptState {
    /// Whether interruption has been requested.
    interrupted: AtomicBool,
    /// Optional reason given by the caller.
    reason: Mutex<Option<String>>,
    /// When interruption was requested.
    interrupted_at: Mutex<Option<Instant>>,
}

/// Read-only view of an interruption signal.
///
/// Cheap to clone; all clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    state: Arc<InterruptState>,
}

impl InterruptToken {
    /// Check whether interruption has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    /// The reason given when interrupting, if any.
    pub fn reason(&self) -> Option<String> {
        self.state.reason.lock().clone()
    }

    /// When interruption was requested.
    pub fn interrupted_at(&self) -> Option<Instant> {
        *self.state.interrupted_at.lock()
    }
}

/// Owner of an interruption signal.
///
/// Clones trigger the same signal.
#[derive(Debug, Clone, Default)]
pub struct InterruptSource {
    token: InterruptToken,
}

impl InterruptSource {
    /// Create a new, unsignalled source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a token observing this source.
    pub fn token(&self) -> InterruptToken {
        self.token.clone()
    }

    /// Request interruption.
    pub fn interrupt(&self) {
        self.signal(None);
    }

    /// Request interruption with a reason.
    pub fn interrupt_with_reason(&self, reason: impl Into<String>) {
        self.signal(Some(reason.into()));
    }

    /// Check whether interruption has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.token.is_interrupted()
    }

    fn signal(&self, reason: Option<String>) {
        let state = &self.token.state;
        // Reason first so an observer that sees the flag also sees the reason.
        *state.reason.lock() = reason;
        *state.interrupted_at.lock() = Some(Instant::now());
        state.interrupted.store(true, Ordering::SeqCst);
    }
}

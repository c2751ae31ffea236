//! Failure types for pull evaluation.
//!
//! Every failure that can surface from a running pull is a [`PullError`].
//! The four causes a caller can observe are:
//!
//! - **Evaluation failure**: an `Eval` or `Acquire` effect failed
//!   (`Failed` / `Message`).
//! - **Explicit failure**: raised by `Pull::raise_error`.
//! - **Interruption**: an external signal arrived at a suspension point
//!   (`Interrupted`).
//! - **Cleanup failure**: one or more release-actions failed while a scope
//!   was closing. These are never dropped; they are folded together with
//!   the failure that triggered the close into a `Composite`.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::scope::ScopeId;

/// Error produced while building or evaluating a pull.
#[derive(Debug, Clone, Error)]
pub enum PullError {
    /// An effect failed with an arbitrary error value.
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// An effect or program failed with a plain message.
    #[error("{0}")]
    Message(String),

    /// Evaluation was interrupted by an external signal.
    #[error("{}", display_interrupted(.0))]
    Interrupted(Option<String>),

    /// Several failures surfaced together, in the order they occurred.
    #[error("{}", display_composite(.0))]
    Composite(Vec<PullError>),

    /// A continuation received a value of the wrong type.
    #[error("type mismatch in pull continuation: expected {expected}")]
    TypeMismatch {
        /// Name of the type the continuation expected.
        expected: &'static str,
    },

    /// An instruction targeted a scope that has already closed.
    #[error("{0} is closed")]
    ScopeClosed(ScopeId),

    /// Opening another scope would exceed the configured nesting depth.
    #[error("scope nesting exceeds maximum depth of {max_depth}")]
    ScopeDepthExceeded {
        /// The configured maximum.
        max_depth: usize,
    },

    /// The interpreter was stepped after its run had already ended.
    #[error("pull evaluation has already terminated")]
    Terminated,

    /// The interpreter ran out of its configured step budget.
    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded {
        /// The configured budget.
        limit: u64,
    },
}

fn display_interrupted(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!("evaluation interrupted: {reason}"),
        None => "evaluation interrupted".to_string(),
    }
}

fn display_composite(errors: &[PullError]) -> String {
    let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("{} errors: {}", errors.len(), parts.join("; "))
}

fn flatten(errors: Vec<PullError>) -> Vec<PullError> {
    let mut flat = Vec::with_capacity(errors.len());
    for error in errors {
        match error {
            PullError::Composite(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    flat
}

impl PullError {
    /// Wrap an arbitrary error value.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PullError::Failed(Arc::new(error))
    }

    /// Create a failure from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        PullError::Message(message.into())
    }

    /// Fold a list of failures into one.
    ///
    /// Returns `None` for an empty list and the failure itself for a list of
    /// one. Nested composites are flattened.
    pub fn composite(errors: Vec<PullError>) -> Option<PullError> {
        let mut flat = flatten(errors);
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(PullError::Composite(flat)),
        }
    }

    /// Attach cleanup failures to this failure.
    pub fn and_cleanup(self, cleanup: Vec<PullError>) -> PullError {
        if cleanup.is_empty() {
            return self;
        }
        let mut all = Vec::with_capacity(cleanup.len() + 1);
        all.push(self);
        all.extend(cleanup);
        PullError::Composite(flatten(all))
    }

    /// Whether this failure is, or carries, an interruption.
    ///
    /// A composite counts when any of its parts is an interruption, so
    /// cleanup failures folded into an interruption do not turn it into an
    /// ordinary failure.
    pub fn is_interrupted(&self) -> bool {
        self.errors()
            .iter()
            .any(|e| matches!(e, PullError::Interrupted(_)))
    }

    /// The individual failures this error is made of.
    ///
    /// A non-composite error yields itself.
    pub fn errors(&self) -> &[PullError] {
        match self {
            PullError::Composite(errors) => errors,
            other => std::slice::from_ref(other),
        }
    }
}

impl From<String> for PullError {
    fn from(message: String) -> Self {
        PullError::Message(message)
    }
}

impl From<&str> for PullError {
    fn from(message: &str) -> Self {
        PullError::Message(message.to_string())
    }
}

/// How a scope finished, handed to every release-action it runs.
///
/// Release-actions can use this to, for example, skip a flush when the
/// region failed.
#[derive(Debug, Clone, Default)]
pub enum ExitCase {
    /// The region completed normally, or the resource was released early.
    #[default]
    Succeeded,
    /// The region failed with the given error.
    Errored(PullError),
    /// The region was interrupted or abandoned by its consumer.
    Canceled,
}

impl ExitCase {
    /// Derive the exit case from the failure (if any) that ended a region.
    pub fn from_failure(failure: Option<&PullError>) -> Self {
        match failure {
            None => ExitCase::Succeeded,
            Some(e) if e.is_interrupted() => ExitCase::Canceled,
            Some(e) => ExitCase::Errored(e.clone()),
        }
    }

    /// Whether the region completed normally.
    pub fn is_succeeded(&self) -> bool {
        matches!(self, ExitCase::Succeeded)
    }

    /// Whether the region was cancelled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ExitCase::Canceled)
    }
}

impl fmt::Display for ExitCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCase::Succeeded => write!(f, "succeeded"),
            ExitCase::Errored(e) => write!(f, "errored: {}", e),
            ExitCase::Canceled => write!(f, "canceled"),
        }
    }
}

//! The instruction set.
//!
//! An [`Algebra`] value is one leaf step of a [`Free`] program. Each
//! instruction has a result that the interpreter feeds to the continuation
//! bound after it:
//!
//! | Instruction | Result |
//! |-------------|--------|
//! | `Output(chunk)` | `()` once the consumer asks for more |
//! | `Eval(effect)` | the effect's value |
//! | `Acquire(effect)` | `(resource, Token)` |
//! | `Release(token)` | `()` |
//! | `OpenScope` | the new [`ScopeId`] |
//! | `CloseScope { .. }` | `()`, or the failure it carries |
//! | `RaiseError(e)` | never produces a result |
//! | `Suspend(thunk)` | whatever `thunk()` produces |
//!
//! Results travel type-erased as [`Value`]; the typed `Pull` layer is what
//! guarantees that each continuation receives the type it expects.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::effect::{Effect, Translate};
use crate::error::PullError;
use crate::free::Free;
use crate::scope::{Finalizer, ScopeId};
use crate::token::Token;

/// A type-erased intermediate result.
pub type Value = Box<dyn Any + Send>;

/// Deferred construction of a program fragment.
pub type Thunk<F, O> = Box<dyn FnOnce() -> Free<F, O> + Send>;

/// One leaf instruction of a pull program.
pub enum Algebra<F: Effect, O> {
    /// Emit a chunk of output values.
    Output(Vec<O>),
    /// Run an effect.
    Eval(F::Eff<Value>),
    /// Run an effect that yields a resource together with its release-action.
    Acquire(F::Eff<(Value, Finalizer<F>)>),
    /// Release a resource early.
    Release(Token),
    /// Open a child of the current scope.
    OpenScope,
    /// Close a scope, re-raising `failure` once the scope has closed.
    CloseScope {
        /// The scope to close.
        id: ScopeId,
        /// The failure that ended the scope's region, if any.
        failure: Option<PullError>,
    },
    /// Fail.
    RaiseError(PullError),
    /// Build the rest of the program only when reduction reaches it.
    Suspend(Thunk<F, O>),
}

impl<F: Effect, O> Algebra<F, O> {
    /// Instruction name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Algebra::Output(_) => "output",
            Algebra::Eval(_) => "eval",
            Algebra::Acquire(_) => "acquire",
            Algebra::Release(_) => "release",
            Algebra::OpenScope => "open_scope",
            Algebra::CloseScope { .. } => "close_scope",
            Algebra::RaiseError(_) => "raise_error",
            Algebra::Suspend(_) => "suspend",
        }
    }
}

impl<F: Effect, O: Send + 'static> Algebra<F, O> {
    /// Move this instruction to substrate `G`.
    ///
    /// Only `Eval` and `Acquire` (and the release-action `Acquire` yields)
    /// change; everything else is carried over as is.
    pub(crate) fn translate<G, N>(self, nt: &Arc<N>) -> Algebra<G, O>
    where
        G: Effect,
        N: Translate<F, G>,
    {
        match self {
            Algebra::Output(chunk) => Algebra::Output(chunk),
            Algebra::Eval(fa) => Algebra::Eval(nt.apply(fa)),
            Algebra::Acquire(fa) => {
                let lift = Arc::clone(nt);
                let fa = F::map(fa, move |(value, finalizer): (Value, Finalizer<F>)| {
                    let finalizer: Finalizer<G> = Box::new(move |exit| lift.apply(finalizer(exit)));
                    (value, finalizer)
                });
                Algebra::Acquire(nt.apply(fa))
            }
            Algebra::Release(token) => Algebra::Release(token),
            Algebra::OpenScope => Algebra::OpenScope,
            Algebra::CloseScope { id, failure } => Algebra::CloseScope { id, failure },
            Algebra::RaiseError(e) => Algebra::RaiseError(e),
            Algebra::Suspend(thunk) => {
                let nt = Arc::clone(nt);
                Algebra::Suspend(Box::new(move || thunk().translate(&nt)))
            }
        }
    }

    /// Rewrite every output value with `f`; nothing else changes.
    pub(crate) fn map_output<O2>(self, f: &Arc<dyn Fn(O) -> O2 + Send + Sync>) -> Algebra<F, O2>
    where
        O2: Send + 'static,
    {
        match self {
            Algebra::Output(chunk) => Algebra::Output(chunk.into_iter().map(|o| f(o)).collect()),
            Algebra::Eval(fa) => Algebra::Eval(fa),
            Algebra::Acquire(fa) => Algebra::Acquire(fa),
            Algebra::Release(token) => Algebra::Release(token),
            Algebra::OpenScope => Algebra::OpenScope,
            Algebra::CloseScope { id, failure } => Algebra::CloseScope { id, failure },
            Algebra::RaiseError(e) => Algebra::RaiseError(e),
            Algebra::Suspend(thunk) => {
                let f = Arc::clone(f);
                Algebra::Suspend(Box::new(move || thunk().map_output(&f)))
            }
        }
    }
}

impl<F: Effect, O: fmt::Debug> fmt::Debug for Algebra<F, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algebra::Output(chunk) => f.debug_tuple("Output").field(chunk).finish(),
            Algebra::Release(token) => f.debug_tuple("Release").field(token).finish(),
            Algebra::CloseScope { id, failure } => f
                .debug_struct("CloseScope")
                .field("id", id)
                .field("failure", failure)
                .finish(),
            Algebra::RaiseError(e) => f.debug_tuple("RaiseError").field(e).finish(),
            other => f.write_str(other.name()),
        }
    }
}

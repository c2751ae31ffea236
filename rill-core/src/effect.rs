//! Effect substrate contract.
//!
//! The core never decides how an effect executes. It is generic over an
//! [`Effect`] type that supplies:
//!
//! - a representation `Eff<T>` of "an effect producing `T`",
//! - a way to run one to completion (`run`),
//! - `pure`/`unit` for trivial effects and `map` for post-processing,
//! - optionally, an interruption signal.
//!
//! `map` is what lets the algebra store effects with their result type
//! erased: every `Eval` is mapped into `Eff<Value>` when it is built.
//!
//! Two substrates ship with the crate: [`Io`], which runs boxed closures on
//! the calling thread, and [`NoEffect`], whose effects are plain values and
//! cannot fail. [`Translate`] lifts a program from one substrate to another.

use std::fmt;

use crate::error::PullError;
use crate::interrupt::InterruptToken;

/// An effect substrate the interpreter can drive.
pub trait Effect: Send + Sync + 'static {
    /// An effect that produces a `T` when run.
    type Eff<T: Send + 'static>: Send + 'static;

    /// An effect that immediately produces `value`.
    fn pure<T: Send + 'static>(value: T) -> Self::Eff<T>;

    /// An effect that does nothing.
    fn unit() -> Self::Eff<()> {
        Self::pure(())
    }

    /// Transform the result of an effect.
    fn map<A, B, M>(fa: Self::Eff<A>, f: M) -> Self::Eff<B>
    where
        A: Send + 'static,
        B: Send + 'static,
        M: FnOnce(A) -> B + Send + 'static;

    /// Run an effect to completion.
    fn run<T: Send + 'static>(&self, fa: Self::Eff<T>) -> Result<T, PullError>;

    /// Interruption signal supplied by the substrate, if it has one.
    fn interruption(&self) -> Option<InterruptToken> {
        None
    }
}

/// Marker for substrates whose effects can fail.
///
/// `Pull::raise_error` requires it, so a pull over [`NoEffect`] can never
/// contain an explicit failure.
pub trait RaiseError: Effect {}

/// A natural transformation from the effects of `F` to those of `G`.
pub trait Translate<F: Effect, G: Effect>: Send + Sync + 'static {
    /// Rewrite one effect.
    fn apply<T: Send + 'static>(&self, fa: F::Eff<T>) -> G::Eff<T>;
}

// ============================================================================
// Io
// ============================================================================

/// Synchronous substrate: effects are closures run on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Io;

/// An [`Io`] effect.
pub struct Task<T>(Box<dyn FnOnce() -> Result<T, PullError> + Send>);

impl<T: Send + 'static> Task<T> {
    /// Create a task from a fallible closure.
    pub fn new<C>(f: C) -> Self
    where
        C: FnOnce() -> Result<T, PullError> + Send + 'static,
    {
        Task(Box::new(f))
    }

    /// Create a task from an infallible closure.
    pub fn delay<C>(f: C) -> Self
    where
        C: FnOnce() -> T + Send + 'static,
    {
        Task(Box::new(move || Ok(f())))
    }

    /// A task that yields `value`.
    pub fn pure(value: T) -> Self {
        Task(Box::new(move || Ok(value)))
    }

    /// A task that fails with `error`.
    pub fn fail(error: impl Into<PullError>) -> Self {
        let error = error.into();
        Task(Box::new(move || Err(error)))
    }

    /// Run the task on the current thread.
    pub fn run(self) -> Result<T, PullError> {
        (self.0)()
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

impl Effect for Io {
    type Eff<T: Send + 'static> = Task<T>;

    fn pure<T: Send + 'static>(value: T) -> Task<T> {
        Task::pure(value)
    }

    fn map<A, B, M>(fa: Task<A>, f: M) -> Task<B>
    where
        A: Send + 'static,
        B: Send + 'static,
        M: FnOnce(A) -> B + Send + 'static,
    {
        Task::new(move || fa.run().map(f))
    }

    fn run<T: Send + 'static>(&self, fa: Task<T>) -> Result<T, PullError> {
        fa.run()
    }
}

impl RaiseError for Io {}

// ============================================================================
// NoEffect
// ============================================================================

/// Substrate with no side effects: an effect is the value it produces.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEffect;

impl Effect for NoEffect {
    type Eff<T: Send + 'static> = T;

    fn pure<T: Send + 'static>(value: T) -> T {
        value
    }

    fn map<A, B, M>(fa: A, f: M) -> B
    where
        A: Send + 'static,
        B: Send + 'static,
        M: FnOnce(A) -> B + Send + 'static,
    {
        f(fa)
    }

    fn run<T: Send + 'static>(&self, fa: T) -> Result<T, PullError> {
        Ok(fa)
    }
}

/// Lifts pure programs into any substrate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lift;

impl<G: Effect> Translate<NoEffect, G> for Lift {
    fn apply<T: Send + 'static>(&self, fa: T) -> G::Eff<T> {
        G::pure(fa)
    }
}

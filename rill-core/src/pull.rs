//! The `Pull` facade.
//!
//! A [`Pull<F, O, R>`] is a program that may emit values of type `O`, run
//! effects of substrate `F`, acquire resources, and finally produce a result
//! of type `R`. Pulls are plain values: building one runs nothing, and every
//! combinator consumes its receiver and returns a new program.
//!
//! # Example
//!
//! ```rust
//! use rill_core::effect::{Io, Task};
//! use rill_core::pull::Pull;
//!
//! let program = Pull::<Io, i32, ()>::output(vec![1, 2, 3])
//!     .then(Pull::eval(Task::pure(10)))
//!     .flat_map(|n| Pull::output1(n).as_(n * 2));
//!
//! let (outputs, result) = program.run(Io).unwrap();
//! assert_eq!(outputs, vec![1, 2, 3, 10]);
//! assert_eq!(result, 20);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::algebra::{Algebra, Value};
use crate::config::EngineConfig;
use crate::effect::{Effect, Lift, NoEffect, RaiseError, Translate};
use crate::error::{ExitCase, PullError};
use crate::free::{downcast, Free};
use crate::interpreter::{Interpreter, Step};
use crate::scope::{Finalizer, ScopeId};
use crate::stream::Stream;
use crate::token::Token;

/// A program over substrate `F` that emits `O`s and produces an `R`.
pub struct Pull<F: Effect, O, R> {
    free: Free<F, O>,
    // The result value carried by `free` is always an `R`.
    _result: PhantomData<fn() -> R>,
}

impl<F: Effect, O: Send + 'static, R: Send + 'static> Pull<F, O, R> {
    pub(crate) fn from_free(free: Free<F, O>) -> Self {
        Pull {
            free,
            _result: PhantomData,
        }
    }

    /// The underlying program, for driving with an [`Interpreter`] directly.
    pub fn into_free(self) -> Free<F, O> {
        self.free
    }

    /// A pull that emits nothing and produces `result`.
    pub fn pure(result: R) -> Self {
        Self::from_free(Free::pure(result))
    }

    /// Defer building a pull until evaluation reaches it.
    pub fn suspend<T>(thunk: T) -> Self
    where
        T: FnOnce() -> Pull<F, O, R> + Send + 'static,
    {
        Self::from_free(Free::suspend(move || thunk().free))
    }

    /// Run an effect and produce its value.
    pub fn eval(fa: F::Eff<R>) -> Self {
        let fa = F::map(fa, |r| Box::new(r) as Value);
        Self::from_free(Free::step(Algebra::Eval(fa)))
    }

    /// Run an effect, producing its failure as a value instead of raising it.
    ///
    /// Interruption is not an effect failure and still propagates.
    pub fn attempt_eval(fa: F::Eff<R>) -> Pull<F, O, Result<R, PullError>> {
        Self::eval(fa).map(Ok).handle_error_with(|e| {
            if e.is_interrupted() {
                Pull::fail(e)
            } else {
                Pull::pure(Err(e))
            }
        })
    }

    pub(crate) fn fail(error: PullError) -> Self {
        Self::from_free(Free::Fail(error))
    }

    /// Transform the result.
    pub fn map<R2, M>(self, f: M) -> Pull<F, O, R2>
    where
        R2: Send + 'static,
        M: FnOnce(R) -> R2 + Send + 'static,
    {
        Pull::from_free(self.free.bind(move |value| match downcast::<R>(value) {
            Ok(r) => Free::pure(f(r)),
            Err(e) => Free::Fail(e),
        }))
    }

    /// Continue with a pull built from the result.
    pub fn flat_map<R2, K>(self, k: K) -> Pull<F, O, R2>
    where
        R2: Send + 'static,
        K: FnOnce(R) -> Pull<F, O, R2> + Send + 'static,
    {
        Pull::from_free(self.free.bind(move |value| match downcast::<R>(value) {
            Ok(r) => k(r).free,
            Err(e) => Free::Fail(e),
        }))
    }

    /// Run `next` after `self`, keeping `next`'s result.
    pub fn then<R2: Send + 'static>(self, next: Pull<F, O, R2>) -> Pull<F, O, R2> {
        self.flat_map(move |_| next)
    }

    /// Discard the result.
    pub fn void(self) -> Pull<F, O, ()> {
        self.map(|_| ())
    }

    /// Replace the result with `value`.
    pub fn as_<R2: Send + 'static>(self, value: R2) -> Pull<F, O, R2> {
        self.map(move |_| value)
    }

    /// On failure, continue with the pull `handler` builds from it.
    pub fn handle_error_with<H>(self, handler: H) -> Self
    where
        H: FnOnce(PullError) -> Pull<F, O, R> + Send + 'static,
    {
        Self::from_free(self.free.handle_error_with(move |e| handler(e).free))
    }

    /// Capture any failure, interruption included, as the result.
    pub fn attempt(self) -> Pull<F, O, Result<R, PullError>> {
        self.map(Ok).handle_error_with(|e| Pull::pure(Err(e)))
    }

    /// Rewrite every emitted value with `f`.
    ///
    /// Effects, resources and scopes are untouched.
    pub fn map_output<O2, M>(self, f: M) -> Pull<F, O2, R>
    where
        O2: Send + 'static,
        M: Fn(O) -> O2 + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn(O) -> O2 + Send + Sync> = Arc::new(f);
        Pull::from_free(self.free.map_output(&f))
    }

    /// Run `finalizer` after `self` whether or not `self` failed.
    ///
    /// The result is the finalizer's. A failure of `self` is re-raised once
    /// the finalizer has run. If both fail, the finalizer's failure comes
    /// first in a composite that still carries the original.
    pub fn on_complete<R2>(self, finalizer: Pull<F, O, R2>) -> Pull<F, O, R2>
    where
        R2: Send + 'static,
    {
        self.attempt().flat_map(move |first| {
            finalizer.attempt().flat_map(move |second| match (first, second) {
                (Ok(_), Ok(r)) => Pull::pure(r),
                (Err(e), Ok(_)) => Pull::fail(e),
                (Ok(_), Err(cleanup)) => Pull::fail(cleanup),
                (Err(e), Err(cleanup)) => Pull::fail(cleanup.and_cleanup(vec![e])),
            })
        })
    }

    /// Run `self` in a fresh child scope, discarding its result.
    ///
    /// Every resource acquired inside is released when the scope closes,
    /// before any failure of `self` propagates.
    pub fn scope(self) -> Pull<F, O, ()> {
        let body = self.void().attempt();
        Pull::from_free(Free::step(Algebra::OpenScope).bind(move |id| {
            let id = match downcast::<ScopeId>(id) {
                Ok(id) => id,
                Err(e) => return Free::Fail(e),
            };
            body.free.bind(move |outcome| {
                let failure = match downcast::<Result<(), PullError>>(outcome) {
                    Ok(outcome) => outcome.err(),
                    Err(e) => Some(e),
                };
                Free::step(Algebra::CloseScope { id, failure })
            })
        }))
    }

    /// The output-only form of `self`, in its own scope.
    pub fn stream(self) -> Stream<F, O> {
        Stream::new(self.scope())
    }

    /// The output-only form of `self` without a scope boundary.
    ///
    /// Resources acquired by `self` belong to whatever scope the stream is
    /// evaluated in and live until that scope closes.
    pub fn stream_no_scope(self) -> Stream<F, O> {
        Stream::new(self.void())
    }

    /// Move the pull to substrate `G`.
    pub fn translate<G, N>(self, nt: N) -> Pull<G, O, R>
    where
        G: Effect,
        N: Translate<F, G>,
    {
        Pull::from_free(self.free.translate(&Arc::new(nt)))
    }

    /// Widen the output type.
    pub fn covary_output<O2>(self) -> Pull<F, O2, R>
    where
        O2: Send + 'static,
        O: Into<O2>,
    {
        self.map_output(Into::into)
    }

    /// Widen the result type.
    pub fn covary_resource<R2>(self) -> Pull<F, O, R2>
    where
        R2: Send + 'static,
        R: Into<R2>,
    {
        self.map(Into::into)
    }

    /// Evaluate to completion, collecting every output and the result.
    pub fn run(self, runtime: F) -> Result<(Vec<O>, R), PullError> {
        self.run_with(runtime, EngineConfig::default())
    }

    /// Like [`Pull::run`] with an explicit configuration.
    pub fn run_with(self, runtime: F, config: EngineConfig) -> Result<(Vec<O>, R), PullError> {
        let mut interpreter = Interpreter::with_config(runtime, self.free, config);
        let mut outputs = Vec::new();
        loop {
            match interpreter.step()? {
                Step::Output(chunk) => outputs.extend(chunk),
                Step::Done(value) => return Ok((outputs, downcast::<R>(value)?)),
            }
        }
    }
}

impl<F: RaiseError, O: Send + 'static, R: Send + 'static> Pull<F, O, R> {
    /// A pull that fails with `error`.
    pub fn raise_error(error: impl Into<PullError>) -> Self {
        Self::from_free(Free::step(Algebra::RaiseError(error.into())))
    }
}

// ============================================================================
// Resources
// ============================================================================

impl<F: Effect, O: Send + 'static, R: Clone + Send + 'static> Pull<F, O, R> {
    fn acquire_token<Rel>(fa: F::Eff<R>, release: Rel) -> Pull<F, O, (R, Token)>
    where
        Rel: FnOnce(R, ExitCase) -> F::Eff<()> + Send + 'static,
    {
        let fa = F::map(fa, move |resource: R| {
            let held = resource.clone();
            let finalizer: Finalizer<F> = Box::new(move |exit| release(held, exit));
            (Box::new(resource) as Value, finalizer)
        });
        Pull::from_free(Free::step(Algebra::Acquire(fa)).bind(|acquired| {
            match downcast::<(Value, Token)>(acquired) {
                Ok((resource, token)) => match downcast::<R>(resource) {
                    Ok(resource) => Free::pure((resource, token)),
                    Err(e) => Free::Fail(e),
                },
                Err(e) => Free::Fail(e),
            }
        }))
    }

    /// Acquire a resource whose `release` runs when the current scope closes.
    pub fn acquire<Rel>(fa: F::Eff<R>, release: Rel) -> Self
    where
        Rel: FnOnce(R) -> F::Eff<()> + Send + 'static,
    {
        Self::acquire_case(fa, move |r, _| release(r))
    }

    /// Like [`Pull::acquire`], with `release` told how the scope ended.
    pub fn acquire_case<Rel>(fa: F::Eff<R>, release: Rel) -> Self
    where
        Rel: FnOnce(R, ExitCase) -> F::Eff<()> + Send + 'static,
    {
        Self::acquire_token(fa, release).map(|(resource, _)| resource)
    }

    /// Acquire a resource that can also be released before its scope closes.
    pub fn acquire_cancellable<Rel>(fa: F::Eff<R>, release: Rel) -> Pull<F, O, Cancellable<F, R>>
    where
        Rel: FnOnce(R) -> F::Eff<()> + Send + 'static,
    {
        Self::acquire_cancellable_case(fa, move |r, _| release(r))
    }

    /// Like [`Pull::acquire_cancellable`], with `release` told how the
    /// resource's lifetime ended. An early cancel reports
    /// [`ExitCase::Succeeded`].
    pub fn acquire_cancellable_case<Rel>(
        fa: F::Eff<R>,
        release: Rel,
    ) -> Pull<F, O, Cancellable<F, R>>
    where
        Rel: FnOnce(R, ExitCase) -> F::Eff<()> + Send + 'static,
    {
        Self::acquire_token(fa, release).map(|(resource, token)| Cancellable::new(resource, token))
    }
}

/// An acquired resource together with the means to release it early.
pub struct Cancellable<F: Effect, R> {
    resource: R,
    token: Token,
    _effect: PhantomData<fn() -> F>,
}

impl<F: Effect, R> Cancellable<F, R> {
    fn new(resource: R, token: Token) -> Self {
        Cancellable {
            resource,
            token,
            _effect: PhantomData,
        }
    }

    /// The acquired resource.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Take the resource, giving up the ability to cancel.
    pub fn into_resource(self) -> R {
        self.resource
    }

    /// The registration token of the resource.
    pub fn token(&self) -> Token {
        self.token
    }

    /// A pull that releases the resource now.
    ///
    /// Releasing twice, or after the owning scope has closed, does nothing.
    pub fn cancel<O: Send + 'static>(&self) -> Pull<F, O, ()> {
        Pull::from_free(Free::step(Algebra::Release(self.token)))
    }
}

impl<F: Effect, R: Clone> Clone for Cancellable<F, R> {
    fn clone(&self) -> Self {
        Cancellable::new(self.resource.clone(), self.token)
    }
}

impl<F: Effect, R: fmt::Debug> fmt::Debug for Cancellable<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellable")
            .field("resource", &self.resource)
            .field("token", &self.token)
            .finish()
    }
}

// ============================================================================
// Output
// ============================================================================

impl<F: Effect, O: Send + 'static> Pull<F, O, ()> {
    /// Emit one value.
    pub fn output1(value: O) -> Self {
        Self::from_free(Free::step(Algebra::Output(vec![value])))
    }

    /// Emit a chunk of values. An empty chunk emits nothing.
    pub fn output(chunk: Vec<O>) -> Self {
        if chunk.is_empty() {
            Self::done()
        } else {
            Self::from_free(Free::step(Algebra::Output(chunk)))
        }
    }

    /// A pull that does nothing.
    pub fn done() -> Self {
        Self::pure(())
    }

    /// A point at which a pending interruption is observed.
    pub fn interrupt_point() -> Self {
        Self::eval(F::unit())
    }

    /// Build a looping pull from `step`.
    ///
    /// The returned function runs `step` on its argument, and again on every
    /// `Some` state it produces, stopping at `None` or at the first failure.
    /// Each iteration is built only once the previous one has finished.
    pub fn loop_fn<S, St>(step: St) -> impl Fn(S) -> Pull<F, O, ()> + Send + Sync + 'static
    where
        S: Send + 'static,
        St: Fn(S) -> Pull<F, O, Option<S>> + Send + Sync + 'static,
    {
        let step = Arc::new(step);
        move |state| iterate(Arc::clone(&step), state)
    }
}

fn iterate<F, O, S, St>(step: Arc<St>, state: S) -> Pull<F, O, ()>
where
    F: Effect,
    O: Send + 'static,
    S: Send + 'static,
    St: Fn(S) -> Pull<F, O, Option<S>> + Send + Sync + 'static,
{
    (*step)(state).flat_map(move |next| match next {
        Some(state) => Pull::suspend(move || iterate(step, state)),
        None => Pull::done(),
    })
}

// ============================================================================
// Widening
// ============================================================================

impl<O: Send + 'static, R: Send + 'static> Pull<NoEffect, O, R> {
    /// Lift an effect-free pull into substrate `G`.
    pub fn covary<G: Effect>(self) -> Pull<G, O, R> {
        self.translate::<G, Lift>(Lift)
    }

    /// Lift into substrate `G` and widen the output and result types.
    pub fn covary_all<G, O2, R2>(self) -> Pull<G, O2, R2>
    where
        G: Effect,
        O2: Send + 'static,
        R2: Send + 'static,
        O: Into<O2>,
        R: Into<R2>,
    {
        self.covary::<G>().covary_output().covary_resource()
    }
}

impl<F: Effect, O: fmt::Debug, R> fmt::Debug for Pull<F, O, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pull").field(&self.free).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{Io, Task};
    use parking_lot::Mutex;

    type IoPull<O, R> = Pull<Io, O, R>;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Task<()> + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let record = move |entry: &str| {
            let sink = sink.clone();
            let entry = entry.to_string();
            Task::delay(move || sink.lock().push(entry))
        };
        (log, record)
    }

    #[test]
    fn test_pure_and_map() {
        let (out, r) = IoPull::<i32, i32>::pure(20).map(|x| x + 1).run(Io).unwrap();
        assert!(out.is_empty());
        assert_eq!(r, 21);
    }

    #[test]
    fn test_output_empty_chunk_emits_nothing() {
        let (out, _) = IoPull::<i32, ()>::output(Vec::new())
            .then(IoPull::output(vec![1, 2]))
            .run(Io)
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_eval_runs_in_order() {
        let (log, record) = recorder();
        let program = IoPull::<i32, ()>::eval(record("a"))
            .then(IoPull::output1(1))
            .then(IoPull::eval(record("b")));
        let (out, ()) = program.run(Io).unwrap();
        assert_eq!(out, vec![1]);
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_attempt_eval_captures_failure() {
        let (_, r) = IoPull::<(), i32>::attempt_eval(Task::fail("bad")).run(Io).unwrap();
        assert_eq!(r.unwrap_err().to_string(), "bad");
    }

    #[test]
    fn test_raise_error_skips_rest() {
        let (log, record) = recorder();
        let program = IoPull::<i32, ()>::raise_error("stop").then(IoPull::eval(record("never")));
        let err = program.run(Io).unwrap_err();
        assert_eq!(err.to_string(), "stop");
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_handle_error_with_recovers() {
        let program = IoPull::<i32, i32>::raise_error("x")
            .handle_error_with(|e| IoPull::output1(0).as_(e.to_string().len() as i32));
        let (out, r) = program.run(Io).unwrap();
        assert_eq!(out, vec![0]);
        assert_eq!(r, 1);
    }

    #[test]
    fn test_on_complete_runs_after_success() {
        let (log, record) = recorder();
        let program = IoPull::<i32, ()>::output1(1).on_complete(IoPull::eval(record("done")));
        let (out, ()) = program.run(Io).unwrap();
        assert_eq!(out, vec![1]);
        assert_eq!(*log.lock(), vec!["done"]);
    }

    #[test]
    fn test_scope_releases_before_continuing() {
        let (log, record) = recorder();
        let release = record.clone();
        let program = IoPull::<i32, i32>::acquire(Task::pure(7), move |_| release("release"))
            .flat_map(IoPull::output1)
            .scope()
            .then(IoPull::eval(record("after")));
        let (out, ()) = program.run(Io).unwrap();
        assert_eq!(out, vec![7]);
        assert_eq!(*log.lock(), vec!["release", "after"]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (log, record) = recorder();
        let program = IoPull::<i32, String>::acquire_cancellable(
            Task::pure("r".to_string()),
            move |r| record(&format!("release {r}")),
        )
        .flat_map(|c| c.cancel().then(c.cancel()).then(c.cancel()));
        program.stream().drain(Io).unwrap();
        assert_eq!(*log.lock(), vec!["release r"]);
    }

    #[test]
    fn test_loop_fn_counts() {
        let counter = IoPull::<i32, ()>::loop_fn(|n: i32| {
            if n < 3 {
                IoPull::output1(n).as_(Some(n + 1))
            } else {
                IoPull::pure(None)
            }
        });
        let (out, ()) = counter(0).run(Io).unwrap();
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn test_covary_lifts_pure_pull() {
        let pure: Pull<NoEffect, u8, u8> = Pull::output1(1u8).then(Pull::pure(2u8));
        let lifted: Pull<Io, u32, u64> = pure.covary_all();
        let (out, r) = lifted.run(Io).unwrap();
        assert_eq!(out, vec![1u32]);
        assert_eq!(r, 2u64);
    }
}

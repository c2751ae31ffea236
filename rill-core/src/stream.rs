//! The output-only form of a pull.
//!
//! A [`Stream`] is a `Pull<F, O, ()>` that is ready to be consumed: the
//! result has been discarded and, when built with [`Pull::stream`], the whole
//! program runs inside its own scope. [`Stream::compile`] turns it into a
//! [`Chunks`] iterator that drives the interpreter one output chunk at a
//! time.
//!
//! Dropping a `Chunks` before it is exhausted releases every resource the
//! stream still holds.

use crate::config::EngineConfig;
use crate::effect::Effect;
use crate::error::PullError;
use crate::interpreter::{Interpreter, RunState, Step};
use crate::interrupt::InterruptToken;
use crate::pull::Pull;

/// A sequence of output chunks produced by running effects of substrate `F`.
pub struct Stream<F: Effect, O> {
    pull: Pull<F, O, ()>,
}

impl<F: Effect, O: Send + 'static> Stream<F, O> {
    pub(crate) fn new(pull: Pull<F, O, ()>) -> Self {
        Stream { pull }
    }

    /// A stream that emits `chunk` and ends.
    pub fn emits(chunk: Vec<O>) -> Self {
        Pull::output(chunk).stream_no_scope()
    }

    /// A stream that emits nothing.
    pub fn empty() -> Self {
        Pull::done().stream_no_scope()
    }

    /// Back to pull form, to be composed further.
    pub fn pull(self) -> Pull<F, O, ()> {
        self.pull
    }

    /// Prepare to run the stream against `runtime`.
    pub fn compile(self, runtime: F) -> Chunks<F, O> {
        self.compile_with(runtime, EngineConfig::default(), None)
    }

    /// Like [`Stream::compile`] with an explicit configuration and an
    /// optional interruption signal overriding the substrate's own.
    pub fn compile_with(
        self,
        runtime: F,
        config: EngineConfig,
        interrupt: Option<InterruptToken>,
    ) -> Chunks<F, O> {
        let mut interpreter = Interpreter::with_config(runtime, self.pull.into_free(), config);
        if let Some(token) = interrupt {
            interpreter = interpreter.interrupt_when(token);
        }
        Chunks {
            interpreter,
            done: false,
        }
    }

    /// Run to completion, collecting every emitted value.
    pub fn to_vec(self, runtime: F) -> Result<Vec<O>, PullError> {
        self.fold(runtime, Vec::new(), |mut acc, o| {
            acc.push(o);
            acc
        })
    }

    /// Run to completion for the effects alone.
    pub fn drain(self, runtime: F) -> Result<(), PullError> {
        self.fold(runtime, (), |(), _| ())
    }

    /// Run to completion, folding every emitted value into `init`.
    pub fn fold<A, M>(self, runtime: F, init: A, mut f: M) -> Result<A, PullError>
    where
        M: FnMut(A, O) -> A,
    {
        let mut acc = init;
        for chunk in self.compile(runtime) {
            for o in chunk? {
                acc = f(acc, o);
            }
        }
        Ok(acc)
    }
}

impl<F: Effect, O: std::fmt::Debug> std::fmt::Debug for Stream<F, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Stream").field(&self.pull).finish()
    }
}

/// Iterator over the output chunks of a running stream.
///
/// Yields `Ok(chunk)` for each non-empty chunk, then at most one `Err` if
/// the stream failed, then `None`.
pub struct Chunks<F: Effect, O> {
    interpreter: Interpreter<F, O>,
    done: bool,
}

impl<F: Effect, O: Send + 'static> Chunks<F, O> {
    /// Lifecycle state of the underlying run.
    pub fn state(&self) -> RunState {
        self.interpreter.state()
    }
}

impl<F: Effect, O: Send + 'static> Iterator for Chunks<F, O> {
    type Item = Result<Vec<O>, PullError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.interpreter.step() {
            Ok(Step::Output(chunk)) => Some(Ok(chunk)),
            Ok(Step::Done(_)) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

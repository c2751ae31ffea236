//! The trampolined interpreter.
//!
//! [`Interpreter`] reduces a [`Free`] program one node at a time inside a
//! single `loop`. Pending continuations and handlers live on an explicit
//! frame stack, so neither long bind chains nor deep handler nesting grow the
//! host call stack.
//!
//! ## Reduction
//!
//! - `Pure(v)`: pop frames, discarding handlers, until a continuation is
//!   found and apply it to `v`. With no frames left the run has completed.
//! - `Fail(e)`: pop frames, discarding continuations, until a handler is
//!   found and apply it to `e`. With no frames left the run has failed.
//! - `Bind` / `Handle`: push the frame, continue with the inner program.
//! - `Step(instruction)`: execute it against the substrate and the current
//!   scope (see [`crate::algebra`]).
//!
//! `Output` is the only instruction that hands control back to the caller;
//! [`Interpreter::step`] returns the chunk and resumes with `()` on the next
//! call.
//!
//! ## Termination
//!
//! However a run ends (completion, failure, interruption) the root scope is
//! closed before the outcome is reported, so every resource has been
//! released by the time the caller sees it. Dropping an interpreter whose
//! run has not finished closes the root scope as cancelled.

use tracing::{debug, trace, warn};

use crate::algebra::{Algebra, Value};
use crate::config::EngineConfig;
use crate::effect::Effect;
use crate::error::{ExitCase, PullError};
use crate::free::{Cont, Free, Recover};
use crate::interrupt::InterruptToken;
use crate::scope::{Finalizer, Scope, ScopeId};
use crate::token::Token;

/// What one call to [`Interpreter::step`] produced.
pub enum Step<O> {
    /// A non-empty chunk of output; the run is suspended until the next call.
    Output(Vec<O>),
    /// The program finished with this result.
    Done(Value),
}

impl<O: std::fmt::Debug> std::fmt::Debug for Step<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Output(chunk) => f.debug_tuple("Output").field(chunk).finish(),
            Step::Done(_) => f.write_str("Done(..)"),
        }
    }
}

/// Lifecycle of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// The driver is reducing (or suspended at an output).
    #[default]
    Running,
    /// The program ran to its end.
    Completed,
    /// A failure reached the top of the program.
    Failed,
    /// An interruption reached the top of the program.
    Interrupted,
}

enum Frame<F: Effect, O> {
    Bind(Cont<F, O>),
    Handle(Recover<F, O>),
}

enum Reduced<F: Effect, O> {
    Next(Free<F, O>),
    Emit(Vec<O>),
}

/// Drives a program against a substrate and a scope tree.
pub struct Interpreter<F: Effect, O> {
    runtime: F,
    config: EngineConfig,
    head: Option<Free<F, O>>,
    frames: Vec<Frame<F, O>>,
    root: Scope<F>,
    current: Scope<F>,
    interrupt: Option<InterruptToken>,
    interrupt_delivered: bool,
    resuming: bool,
    steps: u64,
    state: RunState,
}

impl<F: Effect, O: Send + 'static> Interpreter<F, O> {
    /// Create an interpreter with the default configuration.
    pub fn new(runtime: F, program: Free<F, O>) -> Self {
        Self::with_config(runtime, program, EngineConfig::default())
    }

    /// Create an interpreter with an explicit configuration.
    pub fn with_config(runtime: F, program: Free<F, O>, config: EngineConfig) -> Self {
        let root = Scope::root();
        let interrupt = runtime.interruption();
        Self {
            runtime,
            config,
            head: Some(program),
            frames: Vec::new(),
            current: root.clone(),
            root,
            interrupt,
            interrupt_delivered: false,
            resuming: false,
            steps: 0,
            state: RunState::Running,
        }
    }

    /// Observe `token` for interruption instead of the substrate's signal.
    pub fn interrupt_when(mut self, token: InterruptToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The root of this run's scope tree.
    pub fn root_scope(&self) -> &Scope<F> {
        &self.root
    }

    /// The scope new resources are registered in.
    pub fn current_scope(&self) -> &Scope<F> {
        &self.current
    }

    /// Number of nodes reduced so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Reduce until the program emits a chunk or terminates.
    ///
    /// After the run has terminated every further call returns
    /// [`PullError::Terminated`].
    pub fn step(&mut self) -> Result<Step<O>, PullError> {
        let mut head = self.head.take().ok_or(PullError::Terminated)?;

        if std::mem::take(&mut self.resuming) {
            if let Some(interrupted) = self.poll_interrupt() {
                head = Free::Fail(interrupted);
            }
        }

        loop {
            self.steps += 1;
            if let Some(limit) = self.config.interpreter.max_steps {
                if self.steps > limit {
                    warn!(limit, "step budget exhausted");
                    return self.finish(Err(PullError::StepLimitExceeded { limit }));
                }
            }

            head = match head {
                Free::Pure(value) => match self.pop_continuation() {
                    Some(k) => k(value),
                    None => return self.finish(Ok(value)),
                },
                Free::Fail(error) => match self.pop_handler() {
                    Some(handler) => {
                        debug!(error = %error, "failure handled");
                        handler(error)
                    }
                    None => return self.finish(Err(error)),
                },
                Free::Bind(inner, k) => {
                    self.frames.push(Frame::Bind(k));
                    inner.into_inner()
                }
                Free::Handle(inner, handler) => {
                    self.frames.push(Frame::Handle(handler));
                    inner.into_inner()
                }
                Free::Step(instruction) => match self.reduce(instruction) {
                    Reduced::Next(next) => next,
                    Reduced::Emit(chunk) => {
                        self.head = Some(Free::unit());
                        self.resuming = true;
                        return Ok(Step::Output(chunk));
                    }
                },
            };
        }
    }

    fn pop_continuation(&mut self) -> Option<Cont<F, O>> {
        while let Some(frame) = self.frames.pop() {
            if let Frame::Bind(k) = frame {
                return Some(k);
            }
        }
        None
    }

    fn pop_handler(&mut self) -> Option<Recover<F, O>> {
        while let Some(frame) = self.frames.pop() {
            if let Frame::Handle(handler) = frame {
                return Some(handler);
            }
        }
        None
    }

    fn reduce(&mut self, instruction: Algebra<F, O>) -> Reduced<F, O> {
        if self.config.log.trace_instructions {
            trace!(
                instruction = instruction.name(),
                scope = %self.current.id(),
                depth = self.frames.len(),
                "reduce"
            );
        }

        let next = match instruction {
            Algebra::Output(chunk) => {
                if chunk.is_empty() {
                    Free::unit()
                } else {
                    return Reduced::Emit(chunk);
                }
            }
            Algebra::Eval(fa) => match self.poll_interrupt() {
                Some(interrupted) => Free::Fail(interrupted),
                None => match self.runtime.run(fa) {
                    Ok(value) => Free::Pure(value),
                    Err(e) => Free::Fail(e),
                },
            },
            Algebra::Acquire(fa) => match self.poll_interrupt() {
                Some(interrupted) => Free::Fail(interrupted),
                None => self.acquire(fa),
            },
            Algebra::Release(token) => self.release(token),
            Algebra::OpenScope => match self.current.open_child(self.config.scope.max_depth) {
                Ok(child) => {
                    let id = child.id();
                    self.current = child;
                    Free::pure(id)
                }
                Err(e) => Free::Fail(e),
            },
            Algebra::CloseScope { id, failure } => self.close_scope(id, failure),
            Algebra::RaiseError(e) => Free::Fail(e),
            Algebra::Suspend(thunk) => thunk(),
        };
        Reduced::Next(next)
    }

    fn acquire(&mut self, fa: F::Eff<(Value, Finalizer<F>)>) -> Free<F, O> {
        // No interruption check between the effect and registration: once the
        // resource exists its release-action is recorded.
        match self.runtime.run(fa) {
            Ok((value, finalizer)) => {
                let token = Token::new();
                match self.current.register(token, finalizer, &self.runtime) {
                    Ok(()) => Free::pure((value, token)),
                    Err(e) => Free::Fail(e),
                }
            }
            Err(e) => Free::Fail(e),
        }
    }

    fn release(&mut self, token: Token) -> Free<F, O> {
        let Some(owner) = self.root.find_owner(token) else {
            trace!(%token, "release of unknown token ignored");
            return Free::unit();
        };
        match owner.release(token, &self.runtime) {
            Ok(_) => Free::unit(),
            Err(e) => Free::Fail(e),
        }
    }

    fn close_scope(&mut self, id: ScopeId, failure: Option<PullError>) -> Free<F, O> {
        let exit = ExitCase::from_failure(failure.as_ref());
        let cleanup = match self.current.find_self_or_ancestor(id) {
            Some(scope) => {
                let parent = scope.parent();
                let result = scope.close(&exit, &self.runtime);
                if let Some(parent) = parent {
                    self.current = parent;
                }
                result.err()
            }
            None => {
                debug!(scope = %id, "close of already closed scope ignored");
                None
            }
        };

        let outcome = match failure {
            Some(e) => Some(e.and_cleanup(cleanup.into_iter().collect())),
            None => cleanup,
        };
        match outcome {
            Some(e) => Free::Fail(e),
            None => Free::unit(),
        }
    }

    fn poll_interrupt(&mut self) -> Option<PullError> {
        if self.interrupt_delivered || !self.config.interpreter.interruptible {
            return None;
        }
        let token = self.interrupt.as_ref()?;
        if !token.is_interrupted() {
            return None;
        }
        self.interrupt_delivered = true;
        self.current.interrupt();
        let reason = token.reason();
        let latency = token.interrupted_at().map(|at| at.elapsed());
        debug!(
            scope = %self.current.id(),
            reason = ?reason,
            latency = ?latency,
            "interruption delivered"
        );
        Some(PullError::Interrupted(reason))
    }

    fn finish(&mut self, outcome: Result<Value, PullError>) -> Result<Step<O>, PullError> {
        self.frames.clear();
        let exit = ExitCase::from_failure(outcome.as_ref().err());
        let cleanup = self.root.close(&exit, &self.runtime).err();

        let result = match (outcome, cleanup) {
            (Ok(value), None) => {
                self.state = RunState::Completed;
                Ok(Step::Done(value))
            }
            (Ok(_), Some(cleanup)) => {
                self.state = RunState::Failed;
                Err(cleanup)
            }
            (Err(e), cleanup) => {
                self.state = if e.is_interrupted() {
                    RunState::Interrupted
                } else {
                    RunState::Failed
                };
                Err(e.and_cleanup(cleanup.into_iter().collect()))
            }
        };
        debug!(state = ?self.state, steps = self.steps, "run finished");
        result
    }
}

impl<F: Effect, O> Drop for Interpreter<F, O> {
    fn drop(&mut self) {
        if self.state != RunState::Running {
            return;
        }
        // The consumer stopped pulling before the program finished.
        if let Err(e) = self.root.close(&ExitCase::Canceled, &self.runtime) {
            warn!(error = %e, "release failed while abandoning run");
        }
    }
}

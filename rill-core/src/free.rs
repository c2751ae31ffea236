//! Free programs.
//!
//! A [`Free`] value is "the next step of a suspended computation". Binds and
//! handlers are stored as data rather than performed as host calls, so a
//! program of any length is reduced by the interpreter's loop with a heap
//! allocated frame stack and never by recursion.
//!
//! ## Structural rewrites
//!
//! [`Free::translate`] (change of substrate) and [`Free::map_output`]
//! (change of output type) must not walk the whole program up front: a
//! left-nested chain of a hundred thousand binds would otherwise recurse a
//! hundred thousand frames deep. Both rewrite only the outermost node and
//! defer nested sub-programs behind a `Suspend` instruction, so the rest of
//! the rewrite happens one node at a time as reduction reaches it.
//!
//! ## Dropping
//!
//! A program that is never run is freed the same way: [`Node`] unlinks its
//! nested sub-programs onto a worklist instead of letting drop glue recurse
//! through them.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::algebra::{Algebra, Value};
use crate::effect::{Effect, Translate};
use crate::error::PullError;

/// A continuation: the rest of the program as a function of a result.
pub type Cont<F, O> = Box<dyn FnOnce(Value) -> Free<F, O> + Send>;

/// A recovery function: the replacement program for a failure.
pub type Recover<F, O> = Box<dyn FnOnce(PullError) -> Free<F, O> + Send>;

/// A program built from [`Algebra`] instructions.
pub enum Free<F: Effect, O> {
    /// Finished with a result.
    Pure(Value),
    /// Finished with a failure.
    Fail(PullError),
    /// A single instruction.
    Step(Algebra<F, O>),
    /// Run the first program, then feed its result to the continuation.
    Bind(Node<F, O>, Cont<F, O>),
    /// Run the program, replacing it with the handler's program on failure.
    Handle(Node<F, O>, Recover<F, O>),
}

/// A boxed sub-program nested inside `Bind` or `Handle`.
pub struct Node<F: Effect, O>(Box<Free<F, O>>);

impl<F: Effect, O> Node<F, O> {
    /// Box a sub-program.
    pub fn new(free: Free<F, O>) -> Self {
        Node(Box::new(free))
    }

    /// Unbox the sub-program.
    pub fn into_inner(mut self) -> Free<F, O> {
        self.take()
    }

    fn take(&mut self) -> Free<F, O> {
        std::mem::replace(&mut *self.0, Free::Pure(Box::new(())))
    }
}

impl<F: Effect, O> Deref for Node<F, O> {
    type Target = Free<F, O>;

    fn deref(&self) -> &Free<F, O> {
        &self.0
    }
}

impl<F: Effect, O> Drop for Node<F, O> {
    fn drop(&mut self) {
        let mut pending = match &mut *self.0 {
            Free::Bind(inner, _) | Free::Handle(inner, _) => vec![inner.take()],
            _ => return,
        };
        // Each popped program drops with an already emptied node.
        while let Some(mut free) = pending.pop() {
            if let Free::Bind(inner, _) | Free::Handle(inner, _) = &mut free {
                pending.push(inner.take());
            }
        }
    }
}

impl<F: Effect, O: Send + 'static> Free<F, O> {
    /// A finished program with result `value`.
    pub fn pure<T: Send + 'static>(value: T) -> Self {
        Free::Pure(Box::new(value))
    }

    /// A finished program with result `()`.
    pub fn unit() -> Self {
        Free::Pure(Box::new(()))
    }

    /// A program consisting of one instruction.
    pub fn step(instruction: Algebra<F, O>) -> Self {
        Free::Step(instruction)
    }

    /// Defer building a program until reduction reaches it.
    pub fn suspend<T>(thunk: T) -> Self
    where
        T: FnOnce() -> Free<F, O> + Send + 'static,
    {
        Free::Step(Algebra::Suspend(Box::new(thunk)))
    }

    /// Sequence `self` with a continuation.
    pub fn bind<K>(self, k: K) -> Self
    where
        K: FnOnce(Value) -> Free<F, O> + Send + 'static,
    {
        Free::Bind(Node::new(self), Box::new(k))
    }

    /// Attach a recovery function.
    pub fn handle_error_with<H>(self, handler: H) -> Self
    where
        H: FnOnce(PullError) -> Free<F, O> + Send + 'static,
    {
        Free::Handle(Node::new(self), Box::new(handler))
    }

    /// Move the program to substrate `G`.
    pub fn translate<G, N>(self, nt: &Arc<N>) -> Free<G, O>
    where
        G: Effect,
        N: Translate<F, G>,
    {
        match self {
            Free::Pure(v) => Free::Pure(v),
            Free::Fail(e) => Free::Fail(e),
            Free::Step(instruction) => Free::Step(instruction.translate(nt)),
            Free::Bind(inner, k) => {
                let nt = Arc::clone(nt);
                let inner = inner.into_inner().translate_deferred(&nt);
                Free::Bind(Node::new(inner), Box::new(move |v| k(v).translate(&nt)))
            }
            Free::Handle(inner, handler) => {
                let nt = Arc::clone(nt);
                let inner = inner.into_inner().translate_deferred(&nt);
                let handler = move |e| handler(e).translate(&nt);
                Free::Handle(Node::new(inner), Box::new(handler))
            }
        }
    }

    fn translate_deferred<G, N>(self, nt: &Arc<N>) -> Free<G, O>
    where
        G: Effect,
        N: Translate<F, G>,
    {
        match self {
            leaf @ (Free::Pure(_) | Free::Fail(_) | Free::Step(_)) => leaf.translate(nt),
            nested => {
                let nt = Arc::clone(nt);
                Free::suspend(move || nested.translate(&nt))
            }
        }
    }

    /// Rewrite every emitted value with `f`.
    ///
    /// Only `Output` payloads change; effects, resources and scopes are
    /// carried over untouched.
    pub fn map_output<O2>(self, f: &Arc<dyn Fn(O) -> O2 + Send + Sync>) -> Free<F, O2>
    where
        O2: Send + 'static,
    {
        match self {
            Free::Pure(v) => Free::Pure(v),
            Free::Fail(e) => Free::Fail(e),
            Free::Step(instruction) => Free::Step(instruction.map_output(f)),
            Free::Bind(inner, k) => {
                let f = Arc::clone(f);
                let inner = inner.into_inner().map_output_deferred(&f);
                Free::Bind(Node::new(inner), Box::new(move |v| k(v).map_output(&f)))
            }
            Free::Handle(inner, handler) => {
                let f = Arc::clone(f);
                let inner = inner.into_inner().map_output_deferred(&f);
                let handler = move |e| handler(e).map_output(&f);
                Free::Handle(Node::new(inner), Box::new(handler))
            }
        }
    }

    fn map_output_deferred<O2>(self, f: &Arc<dyn Fn(O) -> O2 + Send + Sync>) -> Free<F, O2>
    where
        O2: Send + 'static,
    {
        match self {
            leaf @ (Free::Pure(_) | Free::Fail(_) | Free::Step(_)) => leaf.map_output(f),
            nested => {
                let f = Arc::clone(f);
                Free::suspend(move || nested.map_output(&f))
            }
        }
    }
}

/// Recover a typed result from a [`Value`].
pub fn downcast<T: Any>(value: Value) -> Result<T, PullError> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| PullError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })
}

impl<F: Effect, O: fmt::Debug> fmt::Debug for Free<F, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Free::Pure(_) => f.write_str("Pure(..)"),
            Free::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            Free::Step(instruction) => f.debug_tuple("Step").field(instruction).finish(),
            Free::Bind(inner, _) => f
                .debug_tuple("Bind")
                .field(&**inner)
                .field(&"<cont>")
                .finish(),
            Free::Handle(inner, _) => f
                .debug_tuple("Handle")
                .field(&**inner)
                .field(&"<handler>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{Io, Lift, NoEffect};

    #[test]
    fn test_downcast_match_and_mismatch() {
        assert_eq!(downcast::<i32>(Box::new(7i32)).unwrap(), 7);
        let err = downcast::<String>(Box::new(7i32)).unwrap_err();
        assert!(matches!(err, PullError::TypeMismatch { expected } if expected.contains("String")));
    }

    #[test]
    fn test_map_output_rewrites_only_outputs() {
        let program: Free<Io, i32> = Free::step(Algebra::Output(vec![1, 2, 3]));
        let double: Arc<dyn Fn(i32) -> i32 + Send + Sync> = Arc::new(|x: i32| x * 2);
        let doubled = program.map_output(&double);
        match doubled {
            Free::Step(Algebra::Output(chunk)) => assert_eq!(chunk, vec![2, 4, 6]),
            other => panic!("unexpected program: {other:?}"),
        }

        let raise: Free<Io, i32> = Free::step(Algebra::RaiseError(PullError::msg("x")));
        let show: Arc<dyn Fn(i32) -> String + Send + Sync> = Arc::new(|x: i32| x.to_string());
        let mapped = raise.map_output(&show);
        assert!(matches!(mapped, Free::Step(Algebra::RaiseError(_))));
    }

    #[test]
    fn test_translate_defers_nested_programs() {
        let program: Free<NoEffect, ()> =
            Free::unit().bind(|_| Free::unit()).bind(|_| Free::unit());
        let lifted: Free<Io, ()> = program.translate(&Arc::new(Lift));
        match lifted {
            Free::Bind(inner, _) => assert!(matches!(*inner, Free::Step(Algebra::Suspend(_)))),
            other => panic!("unexpected program: {other:?}"),
        }
    }

    #[test]
    fn test_translate_rewrites_eval() {
        let program: Free<NoEffect, ()> = Free::step(Algebra::Eval(Box::new(5i32) as Value));
        let lifted: Free<Io, ()> = program.translate(&Arc::new(Lift));
        match lifted {
            Free::Step(Algebra::Eval(task)) => {
                assert_eq!(downcast::<i32>(task.run().unwrap()).unwrap(), 5)
            }
            other => panic!("unexpected program: {other:?}"),
        }
    }

    #[test]
    fn test_dropping_deep_unrun_program() {
        let mut program: Free<Io, ()> = Free::unit();
        for _ in 0..100_000 {
            program = program.bind(|_| Free::unit()).handle_error_with(Free::Fail);
        }
        drop(program);
    }

    #[test]
    fn test_node_into_inner_keeps_program() {
        let node: Node<Io, i32> = Node::new(Free::step(Algebra::Output(vec![4])));
        assert!(matches!(node.into_inner(), Free::Step(Algebra::Output(ref c)) if c == &vec![4]));
    }
}

//! The scope tree.
//!
//! A [`Scope`] is one lexical resource region of a running pull. Scopes form
//! a tree rooted at the interpreter's root scope: `OpenScope` pushes a child
//! of the current scope, `CloseScope` closes it again.
//!
//! ## Ownership
//!
//! Parents own their children (`Vec<Scope>`); a child only keeps a `Weak`
//! back-reference, used to detach itself when it closes. Each scope owns an
//! insertion-ordered table from [`Token`] to release-action, and nothing
//! outside the scope mutates that table except through `register`,
//! `release` and `close`.
//!
//! ## Closing
//!
//! Closing is one-shot. It closes open descendants first (deepest and most
//! recent first), then runs the scope's own release-actions in reverse
//! acquisition order. Every release-action runs even if an earlier one
//! failed; failures are collected and returned as one composite error.
//!
//! A release-action must terminate. If one never returns, closing never
//! returns; the scope cannot enforce this.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::effect::Effect;
use crate::error::{ExitCase, PullError};
use crate::token::Token;

/// A release-action: given how its region ended, produce the cleanup effect.
pub type Finalizer<F> = Box<dyn FnOnce(ExitCase) -> <F as Effect>::Eff<()> + Send>;

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({})", self.0)
    }
}

/// Global scope ID counter.
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_scope_id() -> ScopeId {
    ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle status of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeStatus {
    /// Accepting resources.
    #[default]
    Open,
    /// An interruption reached this scope; it will close as cancelled.
    Interrupting,
    /// All release-actions have run.
    Closed,
}

struct ScopeState<F: Effect> {
    status: ScopeStatus,
    resources: IndexMap<Token, Finalizer<F>>,
    children: Vec<Scope<F>>,
}

struct ScopeInner<F: Effect> {
    id: ScopeId,
    depth: usize,
    parent: Option<Weak<ScopeInner<F>>>,
    state: Mutex<ScopeState<F>>,
}

/// Handle to a node of the scope tree.
pub struct Scope<F: Effect> {
    inner: Arc<ScopeInner<F>>,
}

impl<F: Effect> Clone for Scope<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Effect> Scope<F> {
    fn with_parent(parent: Option<&Scope<F>>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: next_scope_id(),
                depth: parent.map_or(0, |p| p.inner.depth + 1),
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                state: Mutex::new(ScopeState {
                    status: ScopeStatus::Open,
                    resources: IndexMap::new(),
                    children: Vec::new(),
                }),
            }),
        }
    }

    /// Create a new root scope.
    pub fn root() -> Self {
        let scope = Self::with_parent(None);
        debug!(scope = %scope.id(), "root scope created");
        scope
    }

    /// This scope's identity.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Nesting depth; the root is at depth 0.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Current status.
    pub fn status(&self) -> ScopeStatus {
        self.inner.state.lock().status
    }

    /// Whether the scope has not closed yet.
    pub fn is_open(&self) -> bool {
        self.status() != ScopeStatus::Closed
    }

    /// The parent scope, if this is not the root and the parent still exists.
    pub fn parent(&self) -> Option<Scope<F>> {
        let parent = self.inner.parent.as_ref()?.upgrade()?;
        Some(Scope { inner: parent })
    }

    /// Number of release-actions still pending in this scope.
    pub fn resource_count(&self) -> usize {
        self.inner.state.lock().resources.len()
    }

    /// Number of open child scopes.
    pub fn child_count(&self) -> usize {
        self.inner.state.lock().children.len()
    }

    /// Open a child scope.
    ///
    /// Fails if this scope is closed or the child would be deeper than
    /// `max_depth`.
    pub fn open_child(&self, max_depth: usize) -> Result<Scope<F>, PullError> {
        if self.inner.depth + 1 > max_depth {
            return Err(PullError::ScopeDepthExceeded { max_depth });
        }
        let mut state = self.inner.state.lock();
        if state.status == ScopeStatus::Closed {
            return Err(PullError::ScopeClosed(self.id()));
        }
        let child = Scope::with_parent(Some(self));
        state.children.push(child.clone());
        debug!(parent = %self.id(), scope = %child.id(), "scope opened");
        Ok(child)
    }

    /// Register a release-action under `token`.
    ///
    /// If the scope has already closed the release-action runs immediately
    /// with [`ExitCase::Canceled`] and `ScopeClosed` is returned, so an
    /// acquired resource is never left without a release.
    pub fn register(
        &self,
        token: Token,
        finalizer: Finalizer<F>,
        runtime: &F,
    ) -> Result<(), PullError> {
        let rejected = {
            let mut state = self.inner.state.lock();
            if state.status == ScopeStatus::Closed {
                Some(finalizer)
            } else {
                state.resources.insert(token, finalizer);
                None
            }
        };

        match rejected {
            None => {
                debug!(scope = %self.id(), %token, "resource registered");
                Ok(())
            }
            Some(finalizer) => {
                warn!(
                    scope = %self.id(),
                    %token,
                    "scope closed before registration; releasing now"
                );
                let cleanup = runtime.run(finalizer(ExitCase::Canceled)).err();
                Err(PullError::ScopeClosed(self.id()).and_cleanup(cleanup.into_iter().collect()))
            }
        }
    }

    /// Remove and run the release-action for `token` if this scope holds it.
    ///
    /// Returns `Ok(false)` when the token is not (or no longer) registered
    /// here.
    pub fn release(&self, token: Token, runtime: &F) -> Result<bool, PullError> {
        let finalizer = self.inner.state.lock().resources.shift_remove(&token);
        match finalizer {
            Some(finalizer) => {
                debug!(scope = %self.id(), %token, "resource released early");
                runtime.run(finalizer(ExitCase::Succeeded))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Find the scope in this subtree that holds `token`.
    pub fn find_owner(&self, token: Token) -> Option<Scope<F>> {
        self.subtree()
            .into_iter()
            .find(|scope| scope.inner.state.lock().resources.contains_key(&token))
    }

    /// Find this scope or one of its ancestors by id.
    pub fn find_self_or_ancestor(&self, id: ScopeId) -> Option<Scope<F>> {
        let mut cursor = Some(self.clone());
        while let Some(scope) = cursor {
            if scope.id() == id {
                return Some(scope);
            }
            cursor = scope.parent();
        }
        None
    }

    /// Mark this scope and all open descendants as interrupting.
    pub fn interrupt(&self) {
        for scope in self.subtree() {
            let mut state = scope.inner.state.lock();
            if state.status == ScopeStatus::Open {
                state.status = ScopeStatus::Interrupting;
            }
        }
        debug!(scope = %self.id(), "scope interrupted");
    }

    /// Close this scope and everything below it.
    ///
    /// Descendants close first, then this scope's release-actions run in
    /// reverse acquisition order, each receiving `exit`. The scope then
    /// detaches from its parent. Closing an already closed scope is a no-op.
    pub fn close(&self, exit: &ExitCase, runtime: &F) -> Result<(), PullError> {
        let mut errors = Vec::new();
        // Pre-order reversed: every scope comes after all of its descendants.
        for scope in self.subtree().into_iter().rev() {
            errors.extend(scope.close_local(exit, runtime));
        }

        if let Some(parent) = self.parent() {
            parent.inner.state.lock().children.retain(|c| c.id() != self.id());
        }

        match PullError::composite(errors) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn close_local(&self, exit: &ExitCase, runtime: &F) -> Vec<PullError> {
        let finalizers = {
            let mut state = self.inner.state.lock();
            if state.status == ScopeStatus::Closed {
                return Vec::new();
            }
            state.status = ScopeStatus::Closed;
            state.children.clear();
            std::mem::take(&mut state.resources)
        };

        let count = finalizers.len();
        let mut errors = Vec::new();
        for (token, finalizer) in finalizers.into_iter().rev() {
            if let Err(e) = runtime.run(finalizer(exit.clone())) {
                warn!(scope = %self.id(), %token, error = %e, "release-action failed");
                errors.push(e);
            }
        }
        debug!(scope = %self.id(), released = count, %exit, "scope closed");
        errors
    }

    /// This scope and all of its descendants, in pre-order.
    fn subtree(&self) -> Vec<Scope<F>> {
        let mut out = Vec::new();
        let mut pending = vec![self.clone()];
        while let Some(scope) = pending.pop() {
            let children = scope.inner.state.lock().children.clone();
            // Reverse so siblings come out in creation order.
            pending.extend(children.into_iter().rev());
            out.push(scope);
        }
        out
    }
}

impl<F: Effect> fmt::Debug for Scope<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("depth", &self.inner.depth)
            .field("status", &state.status)
            .field("resources", &state.resources.len())
            .field("children", &state.children.len())
            .finish()
    }
}

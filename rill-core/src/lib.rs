//! # Rill Core
//!
//! A lazy, resource-safe stream evaluation core, generic over the effect
//! substrate that runs its side effects.
//!
//! - **Pull**: composable programs that emit values, run effects, acquire
//!   resources and produce a result
//! - **Free programs**: binds and handlers stored as data, reduced by an
//!   explicit loop so arbitrarily long programs never grow the call stack
//! - **Scope tree**: every acquired resource is released exactly once, in
//!   reverse acquisition order, when its region ends for any reason
//! - **Interruption**: an external signal observed at suspension points
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            RILL CORE                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐                              │
//! │  │     Pull     │  │    Stream    │                              │
//! │  │  (pull.rs)   │  │ (stream.rs)  │                              │
//! │  └──────────────┘  └──────────────┘                              │
//! │         │                 │                                      │
//! │         └────────┬────────┘                                      │
//! │                  │                                               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │ Free/Algebra │  │ Interpreter  │  │    Scope     │            │
//! │  │  (free.rs)   │  │(interpreter) │  │  (scope.rs)  │            │
//! │  └──────────────┘  └──────────────┘  └──────────────┘            │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rill_core::effect::{Io, Task};
//! use rill_core::pull::Pull;
//!
//! let stream = Pull::<Io, &str, _>::acquire(Task::pure("file"), |_| Task::pure(()))
//!     .flat_map(|handle| Pull::output1(handle))
//!     .stream();
//!
//! assert_eq!(stream.to_vec(Io).unwrap(), vec!["file"]);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod algebra;
pub mod config;
pub mod effect;
pub mod error;
pub mod free;
pub mod interpreter;
pub mod interrupt;
pub mod pull;
pub mod scope;
pub mod stream;
pub mod token;

// Re-exports
pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
pub use effect::{Effect, Io, Lift, NoEffect, RaiseError, Task, Translate};
pub use error::{ExitCase, PullError};
pub use interpreter::{Interpreter, RunState, Step};
pub use interrupt::{InterruptSource, InterruptToken};
pub use pull::{Cancellable, Pull};
pub use scope::{Scope, ScopeId, ScopeStatus};
pub use stream::{Chunks, Stream};
pub use token::Token;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Reactive Primitives
//!
//! This module implements the reactive core: containers, reactors, the
//! dependency registry that links them, and batching.
//!
//! # Concepts
//!
//! ## Containers
//!
//! A [`Container`] wraps an aggregate (object, array, set or map). Reading a
//! member inside a reactor registers the reactor as a dependent of that
//! member; writing a member re-runs its dependents before the write returns.
//! Nested aggregates are wrapped lazily as they are read.
//!
//! ## Reactors
//!
//! A reactor is a computation created with [`run`] (or one of its gated
//! variants). It runs once immediately and again whenever a member it read
//! on its previous run changes. Its result lives in a frozen output
//! container, which other reactors can depend on in turn.
//!
//! ## Batches
//!
//! [`batch`] defers reactor runs until the closure returns, so a reactor
//! depending on several members written together runs once.
//!
//! # Implementation Notes
//!
//! Everything is single-threaded. Dependency tracking works through a
//! thread-local context stack: when a container member is read, the
//! innermost running reactor (if any) is recorded against it in the
//! registry. Dependencies are re-derived from scratch on every run.

mod batch;
mod collections;
mod container;
mod context;
pub(crate) mod registry;
mod reactor;
mod scheduler;

pub use batch::{batch, is_batching};
pub use container::{wrap, Container, WeakContainer};
pub use context::{untrack, ReactiveContext};
pub use reactor::{
    clock_gated, dependency_count, dispose, run, run_async, run_count, throttled, ReactorBuilder,
    CURRENT,
};

pub(crate) use reactor::{propagate, ReactorInner};

/// Number of live reactors on the current thread.
pub fn reactor_count() -> usize {
    registry::Registry::reactor_count()
}

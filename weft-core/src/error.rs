//! Error types.
//!
//! Every error here signals a defect in the reactor graph or a misuse of the
//! container API. They are raised synchronously where the violation happens
//! and are never retried.

use thiserror::Error;

use crate::id::{AggregateId, ReactorId};
use crate::value::Key;

/// Errors raised by containers and reactors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A reactor was triggered again while it was still running.
    #[error("recursive update: {0} was re-entered while already running")]
    RecursiveUpdate(ReactorId),

    /// A reactor's output participates in its own input chain.
    #[error("cyclic dependency: the output of {0} feeds back into its own computation")]
    CyclicDependency(ReactorId),

    /// Write or delete on a frozen container, e.g. a reactor output.
    #[error("cannot modify `{key}` on {container}: container is immutable")]
    ImmutableWrite { container: AggregateId, key: Key },

    /// Only objects, arrays, sets and maps can be wrapped.
    #[error("cannot wrap a {0}: only objects, arrays, sets and maps are reactive")]
    InvalidWrapTarget(&'static str),

    /// A reactor was built without a computation.
    #[error("reactor has no computation")]
    MissingComputation,

    /// A shape-specific operation was called on another shape.
    #[error("expected {expected}, found {found}")]
    WrongShape {
        expected: &'static str,
        found: &'static str,
    },

    /// The shape has no slot for this key, e.g. a named field on an array
    /// or an index past the largest array index.
    #[error("a {kind} cannot hold member `{key}`")]
    UnsupportedKey { kind: &'static str, key: Key },

    /// Array lengths are integers between 0 and 2^32 - 1.
    #[error("invalid array length: {0}")]
    InvalidArrayLength(String),

    /// The member is not a function.
    #[error("`{0}` is not callable")]
    NotCallable(Key),

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

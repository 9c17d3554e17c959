//! Weft Core
//!
//! Fine-grained reactive state. Application data lives in reactive
//! containers; computations wrapped as reactors discover what they read
//! automatically and re-run, minimally and glitch-free, when it changes.
//!
//! It implements:
//!
//! - Reactive containers over objects, arrays, sets and maps, with lazy deep
//!   wrapping of nested aggregates
//! - Reactors with automatic dependency discovery and cycle detection
//! - Batched updates
//! - Throttled and clock-gated reactors
//!
//! # Architecture
//!
//! - `value`: the dynamic value model containers hold
//! - `reactive`: containers, reactors, dependency registry and batching
//! - `gate`: scheduling gates deciding when a notified reactor runs
//! - `config`: per-thread runtime settings
//!
//! # Example
//!
//! ```
//! use weft_core::{run, wrap, Value};
//!
//! let todos = wrap(Value::array([])).unwrap();
//! let list = todos.clone();
//! let open = run(move || {
//!     Ok(list
//!         .iter()
//!         .filter(|todo| todo.as_container().is_some_and(|t| !t.get("done").is_truthy()))
//!         .count())
//! })
//! .unwrap();
//!
//! todos
//!     .push([Value::object([("title", Value::from("Buy milk")), ("done", Value::from(false))])])
//!     .unwrap();
//! assert_eq!(open.get("current"), Value::from(1));
//!
//! todos.get(0).as_container().unwrap().set("done", true).unwrap();
//! assert_eq!(open.get("current"), Value::from(0));
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod id;
pub mod reactive;
pub mod value;

pub use config::{config, configure, RuntimeConfig, SelfWritePolicy};
pub use error::{Error, Result};
pub use id::{AggregateId, ReactorId};
pub use reactive::{
    batch, clock_gated, dependency_count, dispose, is_batching, reactor_count, run, run_async,
    run_count, throttled, untrack, wrap, Container, ReactorBuilder, WeakContainer, CURRENT,
};
pub use value::{Class, Function, HashKey, Key, Method, Value};

//! Runtime configuration.
//!
//! Settings are per thread, like the rest of the reactive state. They can be
//! built in code or parsed from JSON:
//!
//! ```
//! use weft_core::{RuntimeConfig, SelfWritePolicy};
//!
//! let config = RuntimeConfig::from_json(r#"{ "self_write": "ignore" }"#).unwrap();
//! assert_eq!(config.self_write, SelfWritePolicy::Ignore);
//! assert!(config.reclaim_idle);
//! ```

use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What happens when a reactor writes a member it read during the same run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfWritePolicy {
    /// Fail the write with [`Error::CyclicDependency`].
    #[default]
    Reject,
    /// Skip notifying the writing reactor; other dependents still run.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub self_write: SelfWritePolicy,

    /// Unregister reactors whose run recorded no dependencies. Nothing could
    /// ever trigger them again; their output keeps its last value.
    pub reclaim_idle: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            self_write: SelfWritePolicy::Reject,
            reclaim_idle: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| Error::InvalidConfig(err.to_string()))
    }
}

thread_local! {
    static CONFIG: Cell<RuntimeConfig> = Cell::new(RuntimeConfig::default());
}

/// Install `config` for the current thread.
pub fn configure(config: RuntimeConfig) {
    CONFIG.with(|current| current.set(config));
}

/// The current thread's configuration.
pub fn config() -> RuntimeConfig {
    CONFIG.with(Cell::get)
}

//! Identifier types.
//!
//! Aggregates and reactors are identified by process-unique integers handed
//! out by atomic counters. Ids are never reused, so a stale id left behind in
//! the registry can never alias a newer aggregate or reactor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one underlying aggregate, and therefore of its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateId(u64);

impl AggregateId {
    /// Generate a new unique aggregate ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

/// Unique identifier for a reactor.
///
/// Used as the key of the dependency registry and of the batch queue, so a
/// reactor is enqueued at most once no matter how many of its inputs change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactorId(u64);

impl ReactorId {
    /// Generate a new unique reactor ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reactor#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reactor_ids_are_unique() {
        let id1 = ReactorId::new();
        let id2 = ReactorId::new();
        let id3 = ReactorId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn aggregate_ids_increase() {
        let a = AggregateId::new();
        let b = AggregateId::new();
        assert!(b.raw() > a.raw());
        assert_eq!(format!("{}", a), format!("container#{}", a.raw()));
    }
}

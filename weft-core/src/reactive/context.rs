//! Reactive Context
//!
//! The reactive context tracks which reactor is currently running and which
//! output containers are currently settling. Container reads consult the
//! first stack to record dependencies; reactors consult both before running
//! to reject re-entry and cycles.
//!
//! # Implementation
//!
//! Both stacks live in thread-local storage. Entering a context returns a
//! guard that pops its entry when dropped, so the stacks stay balanced even
//! when a computation fails with an error or panics partway through.
//!
//! A reactor's output stays on the settling stack for the whole recomputation,
//! including the merge of its result. A write made during that merge which
//! finds its way back to the same reactor is therefore reported as a cycle.

use std::cell::{Cell, RefCell};

use smallvec::SmallVec;

use crate::id::{AggregateId, ReactorId};

thread_local! {
    static CONTEXT_STACK: RefCell<ContextStacks> = RefCell::new(ContextStacks::default());
    static STAMP: Cell<u64> = const { Cell::new(0) };
}

#[derive(Default)]
struct ContextStacks {
    /// Running reactors, innermost last. `None` marks an untracked scope.
    running: SmallVec<[Option<ReactorId>; 8]>,

    /// Outputs of reactors in the middle of recomputation.
    settling: SmallVec<[AggregateId; 8]>,
}

/// Guard for a running reactor; pops the context when dropped.
pub struct ReactiveContext {
    reactor: Option<ReactorId>,
}

impl ReactiveContext {
    /// Enter a tracking context for the given reactor.
    ///
    /// While this context is innermost, every container read registers the
    /// reactor as a dependent of the member read.
    pub(crate) fn enter(reactor: ReactorId) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().running.push(Some(reactor)));
        Self {
            reactor: Some(reactor),
        }
    }

    /// Enter a scope in which reads are not recorded.
    pub(crate) fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().running.push(None));
        Self { reactor: None }
    }

    /// Check if reads are currently being recorded.
    pub fn is_active() -> bool {
        Self::current_reactor().is_some()
    }

    /// The reactor reads are currently recorded for, if any.
    pub fn current_reactor() -> Option<ReactorId> {
        CONTEXT_STACK.with(|stack| stack.borrow().running.last().copied().flatten())
    }

    /// Whether the reactor is anywhere on the running stack.
    pub(crate) fn is_running(reactor: ReactorId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().running.contains(&Some(reactor)))
    }

    /// Mark an output container as settling until the guard is dropped.
    pub(crate) fn settle(output: AggregateId) -> Settling {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().settling.push(output));
        Settling { output }
    }

    /// Whether the output container is currently settling.
    pub(crate) fn is_settling(output: AggregateId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().settling.contains(&output))
    }

    /// Next value of the monotonic stamp counter.
    ///
    /// Writes and reactor runs are both stamped. A reactor whose latest run
    /// started after a write has already observed that write.
    pub(crate) fn next_stamp() -> u64 {
        STAMP.with(|stamp| {
            let next = stamp.get() + 1;
            stamp.set(next);
            next
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let _ = CONTEXT_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().running.pop();
            debug_assert_eq!(
                popped,
                Some(self.reactor),
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.reactor,
                popped
            );
        });
    }
}

/// Guard for a settling output container.
pub(crate) struct Settling {
    output: AggregateId,
}

impl Drop for Settling {
    fn drop(&mut self) {
        let _ = CONTEXT_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().settling.pop();
            debug_assert_eq!(popped, Some(self.output), "settling stack mismatch");
        });
    }
}

/// Run `f` without recording any dependencies.
///
/// Reads inside `f` still see current values; they just do not subscribe the
/// surrounding reactor.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let _ctx = ReactiveContext::untracked();
    f()
}

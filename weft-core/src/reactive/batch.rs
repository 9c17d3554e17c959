//! Batch Scope
//!
//! Inside [`batch`], notifications queue their reactors instead of running
//! them. Nested batches share the queue; when the outermost one ends, every
//! queued reactor runs once, in the order it was first queued, and sees the
//! final state of everything written inside the batch.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use super::reactor::ReactorInner;
use crate::error::Result;
use crate::id::ReactorId;

#[derive(Default)]
struct BatchState {
    depth: usize,
    /// Queued reactors with the stamp of the latest write that queued them.
    pending: IndexMap<ReactorId, (Rc<ReactorInner>, u64)>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Queue `reactor` if a batch is open. Returns `false` when there is no
/// batch and the caller should run the reactor itself.
pub(crate) fn enqueue(reactor: &Rc<ReactorInner>, stamp: u64) -> bool {
    BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        if batch.depth == 0 {
            return false;
        }
        batch.pending.insert(reactor.id(), (Rc::clone(reactor), stamp));
        true
    })
}

/// Whether a batch is open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|batch| batch.borrow().depth > 0)
}

/// Keeps the batch open until dropped. Only the outermost scope flushes.
struct BatchScope {
    finished: bool,
}

impl BatchScope {
    fn open() -> Self {
        BATCH.with(|batch| batch.borrow_mut().depth += 1);
        Self { finished: false }
    }

    /// Close the scope; returns whether it was the outermost one.
    fn close(&mut self) -> bool {
        self.finished = true;
        BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.depth -= 1;
            batch.depth == 0
        })
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // unwinding out of `f`: queued work is dropped
        let _ = BATCH.try_with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.depth -= 1;
            if batch.depth == 0 {
                batch.pending.clear();
            }
        });
    }
}

/// Run `f` with reactor invocations deferred until it returns.
///
/// The queue is flushed even if `f` fails, since its writes have already
/// happened; `f`'s error is then returned in preference to one from the
/// flush. A reactor failing during the flush stops it and the rest of the
/// queue is dropped.
pub fn batch<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    let mut scope = BatchScope::open();
    let result = f();
    if !scope.close() {
        return result;
    }
    let flushed = flush();
    let value = result?;
    flushed?;
    Ok(value)
}

fn flush() -> Result<()> {
    let pending = BATCH.with(|batch| std::mem::take(&mut batch.borrow_mut().pending));
    if pending.is_empty() {
        return Ok(());
    }
    debug!(count = pending.len(), "flushing batch");
    for (_, (reactor, stamp)) in pending {
        // already ran as a consequence of an earlier reactor in this flush
        if reactor.started_after(stamp) {
            continue;
        }
        reactor.execute()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::error::Error;
    use crate::reactive::{run, wrap};
    use crate::value::Value;

    #[test]
    fn batch_runs_each_reactor_once() {
        let source = wrap(Value::object([("a", Value::from("A"))])).unwrap();
        let runs = Rc::new(Cell::new(0));
        let (reader, counter) = (source.clone(), runs.clone());
        let output = run(move || {
            counter.set(counter.get() + 1);
            Ok(reader.get("a"))
        })
        .unwrap();

        batch(|| {
            source.set("a", "x")?;
            source.set("a", "y")?;
            assert_eq!(output.get("current"), Value::from("A"));
            Ok(())
        })
        .unwrap();

        assert_eq!(runs.get(), 2);
        assert_eq!(output.get("current"), Value::from("y"));
    }

    #[test]
    fn nested_batches_flush_at_the_outermost() {
        let source = wrap(Value::object([("a", Value::from(1))])).unwrap();
        let reader = source.clone();
        let output = run(move || Ok(reader.get("a"))).unwrap();

        batch(|| {
            batch(|| source.set("a", 2))?;
            assert!(is_batching());
            assert_eq!(output.get("current"), Value::from(1));
            Ok(())
        })
        .unwrap();

        assert!(!is_batching());
        assert_eq!(output.get("current"), Value::from(2));
    }

    #[test]
    fn batch_returns_the_closure_value() {
        assert_eq!(batch(|| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn closure_error_wins_but_writes_still_flush() {
        let source = wrap(Value::object([("a", Value::from(1))])).unwrap();
        let reader = source.clone();
        let output = run(move || Ok(reader.get("a"))).unwrap();

        let result: Result<()> = batch(|| {
            source.set("a", 2)?;
            Err(Error::MissingComputation)
        });

        assert_eq!(result, Err(Error::MissingComputation));
        assert_eq!(output.get("current"), Value::from(2));
    }
}

//! Propagation Scheduler
//!
//! The scheduler decides the order in which notified reactors run. It ensures
//! that a reactor runs only after every notified reactor it reads from.
//!
//! # Algorithm
//!
//! Every reactor carries a rank: zero if it reads no reactor output, otherwise
//! one more than the highest rank among the reactors whose outputs it read on
//! its last run. Ranks are recomputed on every run, so they follow
//! dependencies that change at runtime.
//!
//! 1. A write queues the reactors it notifies, keyed by `(rank, id)`
//! 2. The queue is drained lowest rank first
//! 3. A reactor that merges a result queues its own dependents, which have a
//!    higher rank and therefore wait until everything below them has run
//!
//! A reactor merging several fields holds the queue until the last field is
//! written, so its dependents never see a partially merged output.
//!
//! Draining happens inside the write that started it, so all dependents have
//! run before the write returns.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::trace;

use super::reactor::ReactorInner;
use crate::error::Result;
use crate::id::ReactorId;

#[derive(Default)]
struct SchedulerState {
    /// Queued reactors with the stamp of the latest write that queued them.
    queue: BTreeMap<(u32, ReactorId), (Rc<ReactorInner>, u64)>,
    /// Rank each queued reactor was queued under.
    ranks: HashMap<ReactorId, u32>,
    held: usize,
}

impl SchedulerState {
    fn pop(&mut self) -> Option<(Rc<ReactorInner>, u64)> {
        if self.held > 0 {
            return None;
        }
        let (_, entry) = self.queue.pop_first()?;
        self.ranks.remove(&entry.0.id());
        Some(entry)
    }

    fn clear(&mut self) -> Vec<(Rc<ReactorInner>, u64)> {
        self.ranks.clear();
        std::mem::take(&mut self.queue).into_values().collect()
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Queue `reactor` for the write stamped `stamp`.
pub(crate) fn schedule(reactor: &Rc<ReactorInner>, stamp: u64) {
    SCHEDULER.with(|scheduler| {
        let mut state = scheduler.borrow_mut();
        let id = reactor.id();
        let rank = match state.ranks.get(&id) {
            Some(rank) => *rank,
            None => {
                let rank = reactor.rank();
                state.ranks.insert(id, rank);
                rank
            }
        };
        trace!(reactor = %id, rank, stamp, "scheduled");
        state
            .queue
            .entry((rank, id))
            .and_modify(|entry| entry.1 = entry.1.max(stamp))
            .or_insert_with(|| (Rc::clone(reactor), stamp));
    });
}

/// Run queued reactors, lowest rank first, until the queue is empty or held.
///
/// The first error stops the drain and drops whatever is still queued.
pub(crate) fn run_pending() -> Result<()> {
    loop {
        let next = SCHEDULER.with(|scheduler| scheduler.borrow_mut().pop());
        let Some((reactor, stamp)) = next else {
            return Ok(());
        };
        // already ran as a consequence of a lower-ranked reactor
        if reactor.started_after(stamp) {
            continue;
        }
        if let Err(err) = reactor.execute() {
            discard();
            return Err(err);
        }
    }
}

/// Drop everything still queued.
pub(crate) fn discard() {
    let dropped = SCHEDULER.with(|scheduler| scheduler.borrow_mut().clear());
    if !dropped.is_empty() {
        trace!(count = dropped.len(), "discarding queued reactors");
    }
}

/// Run `f` with the queue held, then drain it.
pub(crate) fn hold<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    let value = {
        let _hold = Hold::acquire();
        f()?
    };
    run_pending()?;
    Ok(value)
}

struct Hold;

impl Hold {
    fn acquire() -> Self {
        SCHEDULER.with(|scheduler| scheduler.borrow_mut().held += 1);
        Hold
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        let _ = SCHEDULER.try_with(|scheduler| scheduler.borrow_mut().held -= 1);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::reactive::{run, wrap, CURRENT};
    use crate::value::Value;

    #[test]
    fn downstream_waits_for_every_upstream() {
        let a = wrap(Value::object([("value", Value::from(1))])).unwrap();

        let ar = a.clone();
        let left = run(move || Ok(ar.get("value").as_f64().unwrap_or(0.0) * 2.0)).unwrap();
        let ar = a.clone();
        let right = run(move || Ok(ar.get("value").as_f64().unwrap_or(0.0) * 3.0)).unwrap();

        let seen: Rc<RefCell<Vec<(f64, f64)>>> = Rc::default();
        let (lr, rr, log) = (left.clone(), right.clone(), seen.clone());
        let sum = run(move || {
            let l = lr.get(CURRENT).as_f64().unwrap_or(0.0);
            let r = rr.get(CURRENT).as_f64().unwrap_or(0.0);
            log.borrow_mut().push((l, r));
            Ok(l + r)
        })
        .unwrap();

        a.set("value", 2).unwrap();
        assert_eq!(sum.get(CURRENT), Value::from(10));
        assert_eq!(*seen.borrow(), vec![(2.0, 3.0), (4.0, 6.0)]);
    }

    #[test]
    fn multi_field_results_settle_before_dependents_run() {
        let a = wrap(Value::object([("value", Value::from(1))])).unwrap();
        let ar = a.clone();
        let pair = run(move || {
            let n = ar.get("value").as_f64().unwrap_or(0.0);
            Ok(Value::object([("low", Value::from(n)), ("high", Value::from(n + 1.0))]))
        })
        .unwrap();

        let seen: Rc<RefCell<Vec<(f64, f64)>>> = Rc::default();
        let (pr, log) = (pair.clone(), seen.clone());
        let _gap = run(move || {
            let low = pr.get("low").as_f64().unwrap_or(0.0);
            let high = pr.get("high").as_f64().unwrap_or(0.0);
            log.borrow_mut().push((low, high));
            Ok(high - low)
        })
        .unwrap();

        a.set("value", 5).unwrap();
        assert_eq!(*seen.borrow(), vec![(1.0, 2.0), (5.0, 6.0)]);
    }
}

//! Clock gate.
//!
//! A clock-gated reactor recomputes only when a tick member of a clock
//! container advances, and only if at least one of its other dependencies
//! changed since its previous run. Other changes are still recorded so the
//! run at the next tick sees the latest values; they just do not trigger a
//! run by themselves.
//!
//! A numeric tick advances only when it grows past the tick of the previous
//! run, so a clock that is reset or steps backwards does not run anything
//! until it passes that tick again. Any other tick advances whenever it
//! differs.

use std::cell::{Cell, RefCell};

use tracing::trace;

use super::Admission;
use crate::id::AggregateId;
use crate::reactive::{Container, WeakContainer};
use crate::value::{Key, Value};

/// Member of the clock container read as the tick when none is given.
pub const DEFAULT_CLOCK_MEMBER: &str = "time";

pub(crate) struct ClockGate {
    clock: WeakContainer,
    clock_id: AggregateId,
    member: Key,
    last_tick: RefCell<Value>,
    dirty: Cell<bool>,
}

impl ClockGate {
    pub(crate) fn new(clock: &Container, member: Key) -> Self {
        Self {
            clock: clock.downgrade(),
            clock_id: clock.id(),
            member: clock.normalize(member),
            last_tick: RefCell::new(Value::Undefined),
            dirty: Cell::new(false),
        }
    }

    pub(crate) fn admit(&self, source: AggregateId, keys: &[Key]) -> Admission {
        let from_clock = source == self.clock_id;
        let ticked = from_clock && keys.contains(&self.member);
        if !from_clock || keys.iter().any(|key| *key != self.member) {
            self.dirty.set(true);
        }
        if !ticked {
            return Admission::Defer;
        }
        let tick = self.current_tick();
        if self.dirty.get() && advanced(&tick, &self.last_tick.borrow()) {
            Admission::Run
        } else {
            trace!(%tick, "clock ticked with nothing to do");
            Admission::Defer
        }
    }

    /// Subscribe the running reactor to the tick.
    pub(crate) fn track(&self) {
        if let Some(clock) = self.clock.upgrade() {
            clock.get(self.member.clone());
        }
    }

    pub(crate) fn after_run(&self) {
        *self.last_tick.borrow_mut() = self.current_tick();
        self.dirty.set(false);
    }

    fn current_tick(&self) -> Value {
        self.clock
            .upgrade()
            .map(|clock| clock.peek(self.member.clone()))
            .unwrap_or_default()
    }
}

fn advanced(tick: &Value, last: &Value) -> bool {
    match (tick.as_f64(), last.as_f64()) {
        (Some(tick), Some(last)) => tick > last,
        _ => tick != last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::wrap;

    #[test]
    fn runs_only_when_dirty_and_ticked() {
        let clock = wrap(Value::object([("time", Value::from(0))])).unwrap();
        let data = wrap(Value::object([("a", Value::from(1))])).unwrap();
        let gate = ClockGate::new(&clock, Key::from(DEFAULT_CLOCK_MEMBER));
        gate.after_run();

        // tick without changes
        clock.set("time", 1).unwrap();
        assert_eq!(gate.admit(clock.id(), &[Key::from("time")]), Admission::Defer);

        // change without tick
        assert_eq!(gate.admit(data.id(), &[Key::from("a")]), Admission::Defer);

        clock.set("time", 2).unwrap();
        assert_eq!(gate.admit(clock.id(), &[Key::from("time")]), Admission::Run);
    }

    #[test]
    fn same_tick_does_not_run_twice() {
        let clock = wrap(Value::object([("time", Value::from(0))])).unwrap();
        let gate = ClockGate::new(&clock, Key::from(DEFAULT_CLOCK_MEMBER));
        gate.after_run();

        gate.dirty.set(true);
        // tick member notified, value unchanged
        assert_eq!(gate.admit(clock.id(), &[Key::from("time")]), Admission::Defer);
    }

    #[test]
    fn backwards_ticks_do_not_run() {
        let clock = wrap(Value::object([("time", Value::from(5))])).unwrap();
        let gate = ClockGate::new(&clock, Key::from(DEFAULT_CLOCK_MEMBER));
        gate.after_run();
        gate.dirty.set(true);

        clock.set("time", 3).unwrap();
        assert_eq!(gate.admit(clock.id(), &[Key::from("time")]), Admission::Defer);
        clock.set("time", 5).unwrap();
        assert_eq!(gate.admit(clock.id(), &[Key::from("time")]), Admission::Defer);
        clock.set("time", 6).unwrap();
        assert_eq!(gate.admit(clock.id(), &[Key::from("time")]), Admission::Run);
    }

    #[test]
    fn non_numeric_ticks_run_on_any_change() {
        assert!(advanced(&Value::from("b"), &Value::from("a")));
        assert!(advanced(&Value::from("a"), &Value::from("b")));
        assert!(!advanced(&Value::from("a"), &Value::from("a")));
        assert!(advanced(&Value::from(0), &Value::Undefined));
    }
}

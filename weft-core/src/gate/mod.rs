//! Scheduling Gates
//!
//! A gate sits between a change notification and the reactor it targets and
//! decides whether the reactor recomputes now or later. Plain reactors have no
//! gate; the throttle gate limits recomputation to one per time window and
//! the clock gate ties it to an external tick counter.
//!
//! A gate sees every notification before batching does, and hears back after
//! each completed run so it can arm timers or remember the tick it ran at.

pub(crate) mod clock;
pub(crate) mod throttle;

use std::rc::Rc;

use crate::id::AggregateId;
use crate::reactive::ReactorInner;
use crate::value::Key;

pub use clock::DEFAULT_CLOCK_MEMBER;
pub(crate) use clock::ClockGate;
pub(crate) use throttle::ThrottleGate;

/// What a gate decided about one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Recompute now (or at the end of the enclosing batch).
    Run,
    /// The gate has taken note and will recompute later, or not at all.
    Defer,
}

pub(crate) enum Gate {
    Immediate,
    Throttle(ThrottleGate),
    Clock(ClockGate),
}

impl Gate {
    pub(crate) fn admit(&self, source: AggregateId, keys: &[Key]) -> Admission {
        match self {
            Gate::Immediate => Admission::Run,
            Gate::Throttle(gate) => gate.admit(),
            Gate::Clock(gate) => gate.admit(source, keys),
        }
    }

    /// Reads the gate performs on the reactor's behalf. Called inside the
    /// reactor's tracking context.
    pub(crate) fn track(&self) {
        if let Gate::Clock(gate) = self {
            gate.track();
        }
    }

    pub(crate) fn after_run(&self, reactor: &Rc<ReactorInner>) {
        match self {
            Gate::Immediate => {}
            Gate::Throttle(gate) => gate.after_run(reactor),
            Gate::Clock(gate) => gate.after_run(),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Gate::Immediate => "immediate",
            Gate::Throttle(_) => "throttle",
            Gate::Clock(_) => "clock",
        }
    }
}

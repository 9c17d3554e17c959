//! Throttle gate.
//!
//! The first notification after a quiet period runs the reactor at once and
//! opens a window. Notifications arriving while the window is open are
//! coalesced into a single trailing run at the window boundary, which opens
//! the next window. A window that closes with nothing pending does nothing.
//!
//! Windows are `tokio` timers spawned with `spawn_local`, so throttled
//! reactors have to live inside a `tokio::task::LocalSet`.

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::trace;

use super::Admission;
use crate::reactive::ReactorInner;

pub(crate) struct ThrottleGate {
    window: Duration,
    timer_active: Cell<bool>,
    pending: Cell<bool>,
}

impl ThrottleGate {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            timer_active: Cell::new(false),
            pending: Cell::new(false),
        }
    }

    pub(crate) fn admit(&self) -> Admission {
        if self.timer_active.get() {
            self.pending.set(true);
            trace!(window = ?self.window, "throttled: deferring to window boundary");
            Admission::Defer
        } else {
            Admission::Run
        }
    }

    /// Open a window after a run, unless one is already open.
    pub(crate) fn after_run(&self, reactor: &Rc<ReactorInner>) {
        if self.timer_active.replace(true) {
            return;
        }
        let reactor: Weak<ReactorInner> = Rc::downgrade(reactor);
        let window = self.window;
        tokio::task::spawn_local(async move {
            tokio::time::sleep(window).await;
            if let Some(reactor) = reactor.upgrade() {
                reactor.expire_throttle();
            }
        });
    }

    /// Close the window. Returns whether a trailing run is due.
    pub(crate) fn close_window(&self) -> bool {
        self.timer_active.set(false);
        self.pending.replace(false)
    }
}

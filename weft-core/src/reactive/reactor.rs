//! Reactor Implementation
//!
//! A reactor is a computation that re-runs whenever a container member it
//! read on its previous run changes. Its result lives in an output container
//! that is created once and updated in place, so downstream reactors can read
//! the output like any other container.
//!
//! # How Reactors Run
//!
//! 1. Refuse to run if the reactor is already running (`RecursiveUpdate`) or
//!    if its output is already settling further up the stack
//!    (`CyclicDependency`).
//!
//! 2. Discard the dependencies recorded by the previous run.
//!
//! 3. Run the computation inside a tracking context; every container read
//!    records a dependency.
//!
//! 4. Merge the result into the output container. A plain object is merged
//!    field by field; anything else lands in the [`CURRENT`] field. The
//!    output stays on the settling stack until the merge has propagated.
//!
//! # Propagation
//!
//! A write queues the affected reactors with the scheduler, which runs them
//! by rank so that a reactor reading another reactor's output runs after it.
//! Each write carries a stamp, and a reactor whose latest run started after
//! the stamp has already seen the write and is skipped. In a diamond
//! `A -> {Q, V}, Q -> V`, `V` therefore runs exactly once per change to `A`,
//! always after `Q`, whichever of the two was created first.
//!
//! # Async Reactors
//!
//! An async computation is polled once inside the tracking context, so reads
//! made before its first suspension point are recorded. If it is not ready, it
//! finishes on a `spawn_local` task and its result is merged when it resolves.
//! Reads after the first suspension point are not tracked. A result that
//! resolves after a newer run has started is discarded.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use futures_util::task::noop_waker_ref;
use futures_util::FutureExt;
use tracing::{debug, error, trace, warn};

use super::batch;
use super::container::{Access, Container};
use super::context::ReactiveContext;
use super::registry::Registry;
use super::scheduler;
use crate::config::{config, SelfWritePolicy};
use crate::error::{Error, Result};
use crate::gate::{Admission, ClockGate, Gate, ThrottleGate, DEFAULT_CLOCK_MEMBER};
use crate::id::{AggregateId, ReactorId};
use crate::value::{Aggregate, Key, ObjectData, Shape, Value};

/// Output field holding any result that is not a plain object.
pub const CURRENT: &str = "current";

type SyncComputation = Box<dyn FnMut() -> Result<Value>>;
type AsyncComputation = Box<dyn FnMut() -> LocalBoxFuture<'static, Result<Value>>>;

enum Computation {
    Sync(SyncComputation),
    Async(AsyncComputation),
}

enum Outcome {
    Ready(Result<Value>),
    Pending(LocalBoxFuture<'static, Result<Value>>),
}

/// Registry-owned state of one reactor.
pub(crate) struct ReactorInner {
    id: ReactorId,
    output: Container,
    computation: RefCell<Computation>,
    gate: Gate,

    /// Stamp taken when the latest run started.
    started_at: Cell<u64>,
    /// Scheduling rank, see the scheduler module.
    rank: Cell<u32>,
    run_count: Cell<usize>,

    /// Bumped on every run; async results carry the value they started with.
    generation: Cell<u64>,
    disposed: Cell<bool>,
}

impl ReactorInner {
    pub(crate) fn id(&self) -> ReactorId {
        self.id
    }

    pub(crate) fn output_id(&self) -> AggregateId {
        self.output.id()
    }

    pub(crate) fn run_count(&self) -> usize {
        self.run_count.get()
    }

    pub(crate) fn rank(&self) -> u32 {
        self.rank.get()
    }

    /// Whether the latest run started after the write stamped `stamp`.
    pub(crate) fn started_after(&self, stamp: u64) -> bool {
        self.started_at.get() > stamp
    }

    /// React to a change of `keys` on `source`.
    pub(crate) fn notify(self: &Rc<Self>, source: AggregateId, keys: &[Key], stamp: u64) -> Result<()> {
        if self.disposed.get() || self.started_after(stamp) {
            return Ok(());
        }
        if ReactiveContext::current_reactor() == Some(self.id) {
            return match config().self_write {
                SelfWritePolicy::Reject => {
                    warn!(reactor = %self.id, container = %source, "reactor wrote a member it depends on");
                    Err(Error::CyclicDependency(self.id))
                }
                SelfWritePolicy::Ignore => {
                    trace!(reactor = %self.id, container = %source, "ignoring self-write");
                    Ok(())
                }
            };
        }
        if self.gate.admit(source, keys) == Admission::Defer {
            return Ok(());
        }
        if !batch::enqueue(self, stamp) {
            scheduler::schedule(self, stamp);
        }
        Ok(())
    }

    /// Recompute and merge into the output.
    pub(crate) fn execute(self: &Rc<Self>) -> Result<()> {
        if self.disposed.get() {
            return Ok(());
        }
        if ReactiveContext::is_running(self.id) {
            warn!(reactor = %self.id, "reactor re-entered while running");
            return Err(Error::RecursiveUpdate(self.id));
        }
        if ReactiveContext::is_settling(self.output.id()) {
            warn!(reactor = %self.id, output = %self.output.id(), "reactor output feeds back into itself");
            return Err(Error::CyclicDependency(self.id));
        }

        Registry::clear_dependencies(self.id);
        self.started_at.set(ReactiveContext::next_stamp());
        self.run_count.set(self.run_count.get() + 1);
        self.generation.set(self.generation.get() + 1);
        debug!(reactor = %self.id, run = self.run_count.get(), gate = self.gate.name(), "running reactor");

        let result = {
            let _settling = ReactiveContext::settle(self.output.id());
            let outcome = {
                let _ctx = ReactiveContext::enter(self.id);
                self.gate.track();
                self.compute()
            };
            self.rank.set(Registry::upstream_rank(self.id));
            match outcome {
                Outcome::Ready(result) => result.and_then(|value| self.merge(value)),
                Outcome::Pending(future) => {
                    self.resolve_later(future);
                    Ok(())
                }
            }
        };
        self.gate.after_run(self);

        if config().reclaim_idle && Registry::dependency_count(self.id) == 0 {
            debug!(reactor = %self.id, "reactor read nothing, unregistering");
            Registry::unregister(self.id);
        }
        result
    }

    fn compute(&self) -> Outcome {
        let mut computation = self.computation.borrow_mut();
        match &mut *computation {
            Computation::Sync(f) => Outcome::Ready(f()),
            Computation::Async(f) => {
                let mut future = f();
                let mut cx = Context::from_waker(noop_waker_ref());
                match future.as_mut().poll(&mut cx) {
                    Poll::Ready(result) => Outcome::Ready(result),
                    Poll::Pending => Outcome::Pending(future),
                }
            }
        }
    }

    fn resolve_later(self: &Rc<Self>, future: LocalBoxFuture<'static, Result<Value>>) {
        let generation = self.generation.get();
        let reactor = Rc::clone(self);
        trace!(reactor = %self.id, generation, "async computation suspended");
        tokio::task::spawn_local(async move {
            let result = future.await;
            reactor.resolve(generation, result);
        });
    }

    fn resolve(self: &Rc<Self>, generation: u64, result: Result<Value>) {
        if self.disposed.get() || self.generation.get() != generation {
            debug!(reactor = %self.id, generation, "discarding superseded async result");
            return;
        }
        let merged = result.and_then(|value| {
            let _settling = ReactiveContext::settle(self.output.id());
            self.merge(value)
        });
        if let Err(err) = merged {
            error!(reactor = %self.id, error = %err, "async reactor failed");
        }
    }

    /// Window boundary of a throttled reactor.
    pub(crate) fn expire_throttle(self: &Rc<Self>) {
        let Gate::Throttle(gate) = &self.gate else {
            return;
        };
        if !gate.close_window() {
            trace!(reactor = %self.id, "throttle window closed idle");
            return;
        }
        debug!(reactor = %self.id, "throttle window closed, running trailing update");
        if let Err(err) = self.execute() {
            error!(reactor = %self.id, error = %err, "trailing throttled run failed");
        }
    }

    /// Write a result into the output. Dependents run once every field is
    /// written.
    fn merge(&self, value: Value) -> Result<()> {
        let fields = value.as_aggregate().and_then(|aggregate| match &*aggregate.shape() {
            Shape::Object(object) if object.class.is_none() => Some(
                object
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        });
        scheduler::hold(|| match fields {
            Some(fields) => {
                for (name, value) in fields {
                    self.output.write(Key::Field(name), value, Access::Owner)?;
                }
                Ok(())
            }
            None => self.output.write(Key::field(CURRENT), value, Access::Owner),
        })
    }

    fn dispose(&self) {
        self.disposed.set(true);
    }
}

impl fmt::Debug for ReactorInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("id", &self.id)
            .field("output", &self.output.id())
            .field("gate", &self.gate.name())
            .field("rank", &self.rank.get())
            .field("run_count", &self.run_count.get())
            .finish()
    }
}

/// Deliver a change of `keys` on `source` to every reactor depending on it,
/// and run whatever that queued.
///
/// Returns the first error a reactor raises; nothing queued after it runs.
pub(crate) fn propagate(source: AggregateId, keys: &[Key]) -> Result<()> {
    let stamp = ReactiveContext::next_stamp();
    for (reactor, touched) in Registry::listeners(source, keys) {
        trace!(reactor = %reactor.id(), container = %source, keys = ?touched, stamp, "notifying");
        if let Err(err) = reactor.notify(source, &touched, stamp) {
            scheduler::discard();
            return Err(err);
        }
    }
    scheduler::run_pending()
}

enum GateSpec {
    Immediate,
    Throttle(Duration),
    Clock(Container),
}

/// Configures and creates a reactor.
///
/// ```
/// use weft_core::{wrap, ReactorBuilder, Value};
///
/// let counter = wrap(Value::object([("n", Value::from(1))])).unwrap();
/// let source = counter.clone();
/// let doubled = ReactorBuilder::new()
///     .compute(move || Ok(source.get("n").as_f64().unwrap_or(0.0) * 2.0))
///     .build()
///     .unwrap();
///
/// counter.set("n", 4).unwrap();
/// assert_eq!(doubled.get("current"), Value::from(8));
/// ```
pub struct ReactorBuilder {
    computation: Option<Computation>,
    gate: GateSpec,
    clock_member: Option<Key>,
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorBuilder {
    pub fn new() -> Self {
        Self {
            computation: None,
            gate: GateSpec::Immediate,
            clock_member: None,
        }
    }

    /// Set a synchronous computation.
    pub fn compute<F, V>(mut self, mut f: F) -> Self
    where
        F: FnMut() -> Result<V> + 'static,
        V: Into<Value>,
    {
        self.computation = Some(Computation::Sync(Box::new(move || f().map(Into::into))));
        self
    }

    /// Set an asynchronous computation. The output holds `current: null`
    /// until the first result arrives.
    pub fn compute_async<F, Fut, V>(mut self, mut f: F) -> Self
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = Result<V>> + 'static,
        V: Into<Value>,
    {
        self.computation = Some(Computation::Async(Box::new(move || {
            f().map(|result| result.map(Into::into)).boxed_local()
        })));
        self
    }

    /// Recompute at most once per `window`; see [`crate::gate`].
    pub fn throttle(mut self, window: Duration) -> Self {
        self.gate = GateSpec::Throttle(window);
        self
    }

    /// Recompute only when `clock` ticks.
    pub fn clock(mut self, clock: &Container) -> Self {
        self.gate = GateSpec::Clock(clock.clone());
        self
    }

    /// Member of the clock container read as the tick. Defaults to `time`.
    pub fn clock_member(mut self, member: impl Into<Key>) -> Self {
        self.clock_member = Some(member.into());
        self
    }

    /// Create the reactor and run it once. Returns its output container.
    pub fn build(self) -> Result<Container> {
        let computation = self.computation.ok_or(Error::MissingComputation)?;
        let output = Container::from_aggregate(Aggregate::new(Shape::Object(ObjectData::default())));
        if matches!(computation, Computation::Async(_)) {
            output.write(Key::field(CURRENT), Value::Null, Access::Owner)?;
        }
        output.freeze();

        let gate = match self.gate {
            GateSpec::Immediate => Gate::Immediate,
            GateSpec::Throttle(window) => Gate::Throttle(ThrottleGate::new(window)),
            GateSpec::Clock(clock) => {
                let member = self
                    .clock_member
                    .unwrap_or_else(|| Key::field(DEFAULT_CLOCK_MEMBER));
                Gate::Clock(ClockGate::new(&clock, member))
            }
        };

        let reactor = Rc::new(ReactorInner {
            id: ReactorId::new(),
            output: output.clone(),
            computation: RefCell::new(computation),
            gate,
            started_at: Cell::new(0),
            rank: Cell::new(0),
            run_count: Cell::new(0),
            generation: Cell::new(0),
            disposed: Cell::new(false),
        });
        debug!(reactor = %reactor.id, output = %output.id(), gate = reactor.gate.name(), "reactor created");

        Registry::register(Rc::clone(&reactor));
        if let Err(err) = reactor.execute() {
            reactor.dispose();
            Registry::unregister(reactor.id);
            return Err(err);
        }
        Ok(output)
    }
}

/// Create a reactor running `f` now and whenever something it read changes.
///
/// Returns the output container: the fields of `f`'s result when it is a
/// plain object, otherwise a single [`CURRENT`] field. The output is frozen;
/// only the reactor itself writes to it.
pub fn run<F, V>(f: F) -> Result<Container>
where
    F: FnMut() -> Result<V> + 'static,
    V: Into<Value>,
{
    ReactorBuilder::new().compute(f).build()
}

/// Create a reactor with an asynchronous computation. Must be called inside a
/// `tokio::task::LocalSet`.
pub fn run_async<F, Fut, V>(f: F) -> Result<Container>
where
    F: FnMut() -> Fut + 'static,
    Fut: Future<Output = Result<V>> + 'static,
    V: Into<Value>,
{
    ReactorBuilder::new().compute_async(f).build()
}

/// Create a reactor that recomputes at most once per `window`. The first run
/// is immediate; changes inside a window produce one trailing run at its end.
/// Must be called inside a `tokio::task::LocalSet`.
pub fn throttled<F, V>(f: F, window: Duration) -> Result<Container>
where
    F: FnMut() -> Result<V> + 'static,
    V: Into<Value>,
{
    ReactorBuilder::new().compute(f).throttle(window).build()
}

/// Create a reactor that recomputes only when `clock.time` advances and
/// something else it read changed since its previous run.
pub fn clock_gated<F, V>(f: F, clock: &Container) -> Result<Container>
where
    F: FnMut() -> Result<V> + 'static,
    V: Into<Value>,
{
    ReactorBuilder::new().compute(f).clock(clock).build()
}

/// Stop the reactor owning `output`. Returns `false` if no live reactor owns it.
pub fn dispose(output: &Container) -> bool {
    match Registry::reactor_for_output(output.id()) {
        Some(reactor) => {
            reactor.dispose();
            debug!(reactor = %reactor.id(), "reactor disposed");
            Registry::unregister(reactor.id()).is_some()
        }
        None => false,
    }
}

/// How many times the reactor owning `output` has run.
pub fn run_count(output: &Container) -> Option<usize> {
    Registry::reactor_for_output(output.id()).map(|reactor| reactor.run_count())
}

/// How many members the reactor owning `output` read on its latest run.
pub fn dependency_count(output: &Container) -> Option<usize> {
    Registry::reactor_for_output(output.id()).map(|reactor| Registry::dependency_count(reactor.id()))
}

//! Dependency Registry
//!
//! The registry is the bidirectional index that connects containers to the
//! reactors reading them:
//!
//! - `(aggregate, key) -> reactors` answers "who must re-run when this member
//!   changes?"
//! - `reactor -> {(aggregate, key)}` answers "what did this reactor read on its
//!   last run?", which is what gets discarded before the next run.
//!
//! # Reclamation
//!
//! The registry owns the reactors. Aggregates report their own drop through
//! [`forget_aggregate`]; the next registry operation prunes every entry keyed
//! by a dropped aggregate, and reclaims reactors left without a single live
//! dependency, since nothing can ever trigger them again. Reclaiming a reactor
//! drops its output container, which may cascade into further reclamation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::ReactiveContext;
use super::reactor::ReactorInner;
use crate::id::{AggregateId, ReactorId};
use crate::value::Key;

/// Keys of one aggregate that touched a given reactor.
pub(crate) type Touched = SmallVec<[Key; 2]>;

#[derive(Default)]
struct RegistryState {
    listeners: HashMap<AggregateId, HashMap<Key, IndexSet<ReactorId>>>,
    dependencies: HashMap<ReactorId, IndexSet<(AggregateId, Key)>>,
    reactors: HashMap<ReactorId, Rc<ReactorInner>>,
    outputs: HashMap<AggregateId, ReactorId>,
}

thread_local! {
    static REGISTRY: RefCell<RegistryState> = RefCell::new(RegistryState::default());
    static DROPPED: RefCell<Vec<AggregateId>> = const { RefCell::new(Vec::new()) };
}

/// Record that an aggregate no longer exists.
///
/// Called from the aggregate's destructor, so it only queues the id; the
/// registry itself may be borrowed further up the stack. Aggregates the
/// registry has never indexed are not queued at all.
pub(crate) fn forget_aggregate(id: AggregateId) {
    let indexed = REGISTRY
        .try_with(|registry| match registry.try_borrow() {
            Ok(state) => state.listeners.contains_key(&id) || state.outputs.contains_key(&id),
            Err(_) => true,
        })
        .unwrap_or(false);
    if !indexed {
        return;
    }
    let _ = DROPPED.try_with(|dropped| {
        if let Ok(mut dropped) = dropped.try_borrow_mut() {
            dropped.push(id);
        }
    });
}

/// Handle to the thread's dependency registry.
pub(crate) struct Registry;

impl Registry {
    /// Register a reactor. The registry keeps it alive until it is disposed
    /// or reclaimed.
    pub(crate) fn register(reactor: Rc<ReactorInner>) {
        Self::prune();
        REGISTRY.with(|registry| {
            let mut state = registry.borrow_mut();
            state.outputs.insert(reactor.output_id(), reactor.id());
            state.dependencies.entry(reactor.id()).or_default();
            state.reactors.insert(reactor.id(), reactor);
        });
    }

    /// Remove a reactor and every dependency it holds.
    ///
    /// The reactor is handed back so the caller drops it outside the borrow.
    pub(crate) fn unregister(id: ReactorId) -> Option<Rc<ReactorInner>> {
        Self::clear_dependencies(id);
        REGISTRY.with(|registry| {
            let mut state = registry.borrow_mut();
            state.dependencies.remove(&id);
            let reactor = state.reactors.remove(&id)?;
            state.outputs.remove(&reactor.output_id());
            Some(reactor)
        })
    }

    /// Look up the reactor owning an output container.
    pub(crate) fn reactor_for_output(output: AggregateId) -> Option<Rc<ReactorInner>> {
        REGISTRY.with(|registry| {
            let state = registry.borrow();
            let id = state.outputs.get(&output)?;
            state.reactors.get(id).cloned()
        })
    }

    /// Record that `reactor` read `key` of `aggregate`.
    pub(crate) fn add_dependency(aggregate: AggregateId, key: Key, reactor: ReactorId) {
        REGISTRY.with(|registry| {
            let mut state = registry.borrow_mut();
            let Some(dependencies) = state.dependencies.get_mut(&reactor) else {
                return;
            };
            if !dependencies.insert((aggregate, key.clone())) {
                return;
            }
            trace!(%reactor, %aggregate, %key, "dependency recorded");
            state
                .listeners
                .entry(aggregate)
                .or_default()
                .entry(key)
                .or_default()
                .insert(reactor);
        });
    }

    /// Discard every dependency recorded for `reactor`.
    ///
    /// Called before each run so that the next run re-derives the set from
    /// scratch.
    pub(crate) fn clear_dependencies(reactor: ReactorId) {
        REGISTRY.with(|registry| {
            let mut state = registry.borrow_mut();
            let Some(dependencies) = state.dependencies.get_mut(&reactor) else {
                return;
            };
            let dependencies = std::mem::take(dependencies);
            for (aggregate, key) in dependencies {
                let Some(keys) = state.listeners.get_mut(&aggregate) else {
                    continue;
                };
                if let Some(reactors) = keys.get_mut(&key) {
                    reactors.shift_remove(&reactor);
                    if reactors.is_empty() {
                        keys.remove(&key);
                    }
                }
                if keys.is_empty() {
                    state.listeners.remove(&aggregate);
                }
            }
        });
    }

    /// Reactors depending on any of `keys` of `aggregate`, in creation order,
    /// each with the subset of keys that touched it.
    pub(crate) fn listeners(aggregate: AggregateId, keys: &[Key]) -> Vec<(Rc<ReactorInner>, Touched)> {
        Self::prune();
        REGISTRY.with(|registry| {
            let state = registry.borrow();
            let Some(by_key) = state.listeners.get(&aggregate) else {
                return Vec::new();
            };
            let mut touched: IndexMap<ReactorId, Touched> = IndexMap::new();
            for key in keys {
                for reactor in by_key.get(key).into_iter().flatten() {
                    touched.entry(*reactor).or_default().push(key.clone());
                }
            }
            touched.sort_keys();
            touched
                .into_iter()
                .filter_map(|(id, keys)| state.reactors.get(&id).map(|r| (r.clone(), keys)))
                .collect()
        })
    }

    /// Scheduling rank of `reactor` from its recorded dependencies: one more
    /// than the highest rank among the other reactors whose outputs it read,
    /// or zero if it read none.
    pub(crate) fn upstream_rank(reactor: ReactorId) -> u32 {
        REGISTRY.with(|registry| {
            let state = registry.borrow();
            let Some(dependencies) = state.dependencies.get(&reactor) else {
                return 0;
            };
            dependencies
                .iter()
                .filter_map(|(aggregate, _)| state.outputs.get(aggregate))
                .filter(|owner| **owner != reactor)
                .filter_map(|owner| state.reactors.get(owner))
                .map(|owner| owner.rank().saturating_add(1))
                .max()
                .unwrap_or(0)
        })
    }

    /// Number of recorded dependencies of a reactor.
    pub(crate) fn dependency_count(reactor: ReactorId) -> usize {
        REGISTRY.with(|registry| {
            registry
                .borrow()
                .dependencies
                .get(&reactor)
                .map_or(0, IndexSet::len)
        })
    }

    /// Number of reactors depending on one member.
    pub(crate) fn observer_count(aggregate: AggregateId, key: &Key) -> usize {
        Self::prune();
        REGISTRY.with(|registry| {
            registry
                .borrow()
                .listeners
                .get(&aggregate)
                .and_then(|keys| keys.get(key))
                .map_or(0, IndexSet::len)
        })
    }

    /// Number of live reactors on this thread.
    pub(crate) fn reactor_count() -> usize {
        Self::prune();
        REGISTRY.with(|registry| registry.borrow().reactors.len())
    }

    /// Drop registry entries of aggregates that no longer exist.
    pub(crate) fn prune() {
        loop {
            let dropped = DROPPED.with(|dropped| std::mem::take(&mut *dropped.borrow_mut()));
            if dropped.is_empty() {
                break;
            }
            let reclaimed = REGISTRY.with(|registry| registry.borrow_mut().forget(&dropped));
            if !reclaimed.is_empty() {
                debug!(count = reclaimed.len(), "reclaimed reactors without live dependencies");
            }
            // Dropping reclaimed reactors may queue more aggregates.
            drop(reclaimed);
        }
    }
}

impl RegistryState {
    fn forget(&mut self, dropped: &[AggregateId]) -> Vec<Rc<ReactorInner>> {
        let mut orphaned: IndexSet<ReactorId> = IndexSet::new();
        for aggregate in dropped {
            self.outputs.remove(aggregate);
            let Some(keys) = self.listeners.remove(aggregate) else {
                continue;
            };
            for (key, reactors) in keys {
                for reactor in reactors {
                    if let Some(dependencies) = self.dependencies.get_mut(&reactor) {
                        dependencies.shift_remove(&(*aggregate, key.clone()));
                        if dependencies.is_empty() {
                            orphaned.insert(reactor);
                        }
                    }
                }
            }
        }

        let mut reclaimed = Vec::new();
        for id in orphaned {
            if ReactiveContext::is_running(id) {
                continue;
            }
            self.dependencies.remove(&id);
            if let Some(reactor) = self.reactors.remove(&id) {
                self.outputs.remove(&reactor.output_id());
                reclaimed.push(reactor);
            }
        }
        reclaimed
    }
}

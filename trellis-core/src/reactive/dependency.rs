//! Dependency Implementation
//!
//! A Dependency is the subscriber-set primitive of the reactive system.
//! Reactive data sources create one Dependency per independently
//! changeable piece of data; reading the data calls `depend()` and
//! writing it calls `changed()`.
//!
//! # Subscription Lifetime
//!
//! A subscription never outlives one run of a computation. Registering a
//! dependent also registers an invalidation callback on that computation
//! which removes it from the set, so a computation that stops reading a
//! dependency on its next run silently drops off.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::reactive::computation::{Computation, ComputationId};
use crate::reactive::tracker::{Tracker, WeakTracker};

/// An atomic unit of reactive data that computations may depend on.
///
/// `Dependency` is a cheap handle; clones share the same subscriber set,
/// mirroring how a data source hands out access to one logical cell.
pub struct Dependency {
    state: Rc<DependencyState>,
}

struct DependencyState {
    tracker: WeakTracker,
    /// Identity-keyed subscriber set. A computation appears at most
    /// once; iteration order carries no guarantee.
    dependents: RefCell<IndexMap<ComputationId, Computation>>,
}

impl Dependency {
    /// Create a dependency bound to `tracker`.
    pub fn new(tracker: &Tracker) -> Self {
        Self {
            state: Rc::new(DependencyState {
                tracker: tracker.downgrade(),
                dependents: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// Declare that the ambient current computation depends on this
    /// dependency.
    ///
    /// Does nothing and returns `false` if no computation is active.
    /// Returns `true` only the first time a given computation
    /// subscribes.
    pub fn depend(&self) -> bool {
        let Some(tracker) = self.state.tracker.upgrade() else {
            return false;
        };
        let Some(current) = tracker.current_computation() else {
            return false;
        };
        self.depend_on(&current)
    }

    /// Declare that `computation` depends on this dependency.
    ///
    /// Idempotent per computation: returns `true` only when the
    /// computation is a new member of the subscriber set. The
    /// subscription is torn down automatically when the computation is
    /// next invalidated.
    pub fn depend_on(&self, computation: &Computation) -> bool {
        let id = computation.id();
        if self.state.dependents.borrow().contains_key(&id) {
            return false;
        }
        self.state
            .dependents
            .borrow_mut()
            .insert(id, computation.clone());

        let weak = Rc::downgrade(&self.state);
        computation.on_invalidate(move |_| {
            if let Some(state) = weak.upgrade() {
                state.dependents.borrow_mut().shift_remove(&id);
            }
        });

        true
    }

    /// Invalidate every current dependent and remove it from the set.
    ///
    /// No ordering guarantee between sibling computations. Each
    /// dependent's own invalidation callback removes it from the set, so
    /// the set is snapshotted before iterating.
    pub fn changed(&self) {
        let dependents: Vec<Computation> =
            self.state.dependents.borrow().values().cloned().collect();
        for computation in dependents {
            computation.invalidate();
        }
    }

    /// True if at least one computation would be invalidated by
    /// [`changed`](Self::changed).
    pub fn has_dependents(&self) -> bool {
        !self.state.dependents.borrow().is_empty()
    }

    /// Number of current dependents.
    pub fn dependent_count(&self) -> usize {
        self.state.dependents.borrow().len()
    }
}

impl Clone for Dependency {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::Dependency;
    use crate::reactive::Tracker;

    #[test]
    fn depend_outside_computation_is_a_no_op() {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);

        assert!(!dependency.depend());
        assert!(!dependency.has_dependents());
    }

    #[test]
    fn depend_is_idempotent_per_computation() {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);
        let first = Rc::new(Cell::new(false));
        let second = Rc::new(Cell::new(true));

        let dependency_clone = dependency.clone();
        let first_clone = first.clone();
        let second_clone = second.clone();
        tracker.autorun(move |_| {
            first_clone.set(dependency_clone.depend());
            second_clone.set(dependency_clone.depend());
        });

        assert!(first.get());
        assert!(!second.get());
        assert_eq!(dependency.dependent_count(), 1);
    }

    #[test]
    fn changed_invalidates_and_clears_dependents() {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);

        let dependency_clone = dependency.clone();
        let computation = tracker.autorun(move |_| {
            dependency_clone.depend();
        });

        assert!(dependency.has_dependents());

        dependency.changed();
        assert!(computation.invalidated());
        // The subscription died with the invalidation.
        assert!(!dependency.has_dependents());
    }

    #[test]
    fn rerun_resubscribes() {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);

        let dependency_clone = dependency.clone();
        tracker.autorun(move |_| {
            dependency_clone.depend();
        });

        dependency.changed();
        assert!(!dependency.has_dependents());

        tracker.flush().unwrap();
        assert!(dependency.has_dependents());
    }

    #[test]
    fn dropping_the_read_drops_the_subscription() {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);
        let keep_reading = Rc::new(Cell::new(true));
        let runs = Rc::new(Cell::new(0));

        let dependency_clone = dependency.clone();
        let keep_clone = keep_reading.clone();
        let runs_clone = runs.clone();
        tracker.autorun(move |_| {
            runs_clone.set(runs_clone.get() + 1);
            if keep_clone.get() {
                dependency_clone.depend();
            }
        });
        assert_eq!(runs.get(), 1);

        keep_reading.set(false);
        dependency.changed();
        tracker.flush().unwrap();
        assert_eq!(runs.get(), 2);

        // The rerun did not read the dependency, so a further change is
        // invisible to the computation.
        dependency.changed();
        tracker.flush().unwrap();
        assert_eq!(runs.get(), 2);
        assert!(!dependency.has_dependents());
    }

    #[test]
    fn explicit_depend_on_registers_a_foreign_computation() {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);

        let computation = tracker.autorun(|_| {});
        assert!(dependency.depend_on(&computation));
        assert!(!dependency.depend_on(&computation));

        dependency.changed();
        assert!(computation.invalidated());
    }

    #[test]
    fn clone_shares_the_subscriber_set() {
        let tracker = Tracker::new();
        let dependency = Dependency::new(&tracker);
        let alias = dependency.clone();

        let computation = tracker.autorun(|_| {});
        dependency.depend_on(&computation);

        assert!(alias.has_dependents());
        alias.changed();
        assert!(!dependency.has_dependents());
    }
}

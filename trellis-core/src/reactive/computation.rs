//! Computation Implementation
//!
//! A Computation is a unit of re-runnable reactive work. It owns its
//! invalidation state and lifecycle callbacks, and it is the thing that
//! dependencies record when they are read.
//!
//! # Lifecycle
//!
//! 1. Created through [`Tracker::autorun`](crate::reactive::Tracker::autorun)
//!    (the constructor is crate-private), which runs the body once
//!    synchronously with `first_run` set.
//!
//! 2. When any dependency read during the last run changes, the
//!    computation is invalidated: it is enqueued for recompute and its
//!    pending invalidation callbacks fire once.
//!
//! 3. On recompute the body runs again. Subscriptions do not survive a
//!    rerun; the body re-establishes them by reading dependencies.
//!
//! 4. Stopping is permanent: a stopped computation is invalidated,
//!    removed from the registry, and never enqueued again.
//!
//! # Error Handling
//!
//! Bodies are fallible. A failed first run stops the computation and
//! propagates to the caller of `autorun`. A failed recompute is routed
//! to the computation's error handler if one was registered, otherwise
//! logged; either way the computation stays alive and reruns on the next
//! invalidation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::BoxError;
use crate::reactive::tracker::{Tracker, WeakTracker};

/// Unique identifier for a computation within one tracker.
///
/// Ids are assigned from a monotonically increasing counter, so they
/// also encode creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputationId(u64);

impl ComputationId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The body of a computation. Receives the computation itself so the
/// body can inspect `first_run`, register callbacks, or stop itself.
pub(crate) type ComputationFn = dyn Fn(&Computation) -> Result<(), BoxError>;

/// Error handler invoked with recompute failures instead of logging.
pub type ErrorHandler = Box<dyn Fn(BoxError)>;

type LifecycleCallback = Box<dyn FnOnce(&Computation)>;

/// A re-runnable unit of reactive work.
///
/// `Computation` is a cheap handle; clones share state. Handles are held
/// by the tracker registry, the pending queue, and every dependency the
/// computation is currently subscribed to.
pub struct Computation {
    state: Rc<ComputationState>,
}

struct ComputationState {
    id: ComputationId,

    /// Optional label used in slow-computation diagnostics. Rust
    /// closures are anonymous, so callers who want readable warnings
    /// supply one explicitly.
    name: Option<&'static str>,

    /// Creation-order link to the computation that was ambient when this
    /// one was created. Not used for propagation ordering.
    parent: Option<ComputationId>,

    tracker: WeakTracker,
    func: Rc<ComputationFn>,
    on_error: Option<ErrorHandler>,

    stopped: Cell<bool>,
    invalidated: Cell<bool>,
    first_run: Cell<bool>,

    /// Guards against re-entrant self-enqueue: a computation that
    /// invalidates itself mid-run reruns immediately via the drain loop
    /// instead of being queued again.
    recomputing: Cell<bool>,

    on_invalidate: RefCell<SmallVec<[LifecycleCallback; 2]>>,
    on_stop: RefCell<SmallVec<[LifecycleCallback; 2]>>,
}

impl Computation {
    /// Create and immediately run a computation.
    ///
    /// Crate-private: the only public entry point is
    /// [`Tracker::autorun`](crate::reactive::Tracker::autorun) and its
    /// variants, which is what keeps computation creation observable by
    /// the runtime.
    ///
    /// A failed first run stops the computation and returns the error to
    /// the caller, after `first_run` has been resolved.
    pub(crate) fn new(
        tracker: &Tracker,
        func: Rc<ComputationFn>,
        parent: Option<ComputationId>,
        name: Option<&'static str>,
        on_error: Option<ErrorHandler>,
    ) -> Result<Self, BoxError> {
        let computation = Self {
            state: Rc::new(ComputationState {
                id: tracker.next_computation_id(),
                name,
                parent,
                tracker: tracker.downgrade(),
                func,
                on_error,
                stopped: Cell::new(false),
                invalidated: Cell::new(false),
                first_run: Cell::new(true),
                recomputing: Cell::new(false),
                on_invalidate: RefCell::new(SmallVec::new()),
                on_stop: RefCell::new(SmallVec::new()),
            }),
        };

        tracker.register(&computation);

        let result = computation.compute(tracker);
        computation.state.first_run.set(false);
        if let Err(error) = result {
            computation.stop();
            return Err(error);
        }

        Ok(computation)
    }

    /// Get the computation's unique id.
    pub fn id(&self) -> ComputationId {
        self.state.id
    }

    /// Get the computation's diagnostic label, if one was supplied.
    pub fn name(&self) -> Option<&'static str> {
        self.state.name
    }

    /// Id of the computation that was ambient when this one was created.
    pub fn parent_id(&self) -> Option<ComputationId> {
        self.state.parent
    }

    /// True if this computation has been stopped.
    pub fn stopped(&self) -> bool {
        self.state.stopped.get()
    }

    /// True if this computation has been invalidated (and not yet
    /// rerun), or if it has been stopped.
    pub fn invalidated(&self) -> bool {
        self.state.invalidated.get()
    }

    /// True only while the body runs for the first time, during
    /// `autorun`.
    pub fn first_run(&self) -> bool {
        self.state.first_run.get()
    }

    /// Register `f` to run the next time this computation is
    /// invalidated, or immediately if it already is. Runs exactly once
    /// per registration, with dependency tracking disabled.
    pub fn on_invalidate(&self, f: impl FnOnce(&Computation) + 'static) {
        if self.state.invalidated.get() {
            self.run_untracked(Box::new(f));
        } else {
            self.state.on_invalidate.borrow_mut().push(Box::new(f));
        }
    }

    /// Register `f` to run when this computation is stopped, or
    /// immediately if it already is. Stop callbacks run after any
    /// invalidation callbacks.
    pub fn on_stop(&self, f: impl FnOnce(&Computation) + 'static) {
        if self.state.stopped.get() {
            self.run_untracked(Box::new(f));
        } else {
            self.state.on_stop.borrow_mut().push(Box::new(f));
        }
    }

    /// Invalidate this computation so that it will be rerun.
    ///
    /// Idempotent. The first call enqueues the computation (unless it is
    /// mid-recompute or stopped) and fires pending invalidation
    /// callbacks. Callbacks registered while this batch runs observe
    /// `invalidated == true` and fire immediately instead of joining it.
    pub fn invalidate(&self) {
        if self.state.invalidated.get() {
            return;
        }

        // A computation that invalidates itself mid-run reruns
        // immediately via the drain loop, so don't enqueue it.
        if !self.state.recomputing.get() && !self.state.stopped.get() {
            if let Some(tracker) = self.state.tracker.upgrade() {
                tracker.require_flush();
                tracker.enqueue(self.clone());
            }
        }

        self.state.invalidated.set(true);

        let callbacks = self.state.on_invalidate.take();
        for f in callbacks {
            self.run_untracked(f);
        }
    }

    /// Permanently prevent this computation from rerunning.
    ///
    /// Idempotent. Stopping invalidates (firing pending invalidation
    /// callbacks), removes the computation from the registry, and fires
    /// stop callbacks once.
    pub fn stop(&self) {
        if self.state.stopped.get() {
            return;
        }

        self.state.stopped.set(true);
        self.invalidate();

        if let Some(tracker) = self.state.tracker.upgrade() {
            tracker.unregister(self.state.id);
        }

        let callbacks = self.state.on_stop.take();
        for f in callbacks {
            self.run_untracked(f);
        }
    }

    /// Whether the drain loop should rerun this computation.
    pub(crate) fn needs_recompute(&self) -> bool {
        self.state.invalidated.get() && !self.state.stopped.get()
    }

    /// Run the body with this computation as the ambient current
    /// computation.
    ///
    /// `invalidated` is cleared first so dependencies read during the
    /// run can re-subscribe. The previous ambient computation and
    /// `in_compute` flag are restored on exit via a drop guard.
    pub(crate) fn compute(&self, tracker: &Tracker) -> Result<(), BoxError> {
        self.state.invalidated.set(false);
        let _guard = tracker.enter_computation(self);
        (self.state.func)(self)
    }

    /// Rerun the body if the computation still needs it.
    ///
    /// Failures are routed to the error handler when present, otherwise
    /// handed to the tracker's log-or-escalate sink. A failed recompute
    /// does not stop the computation.
    pub(crate) fn recompute(&self, tracker: &Tracker) -> Result<(), BoxError> {
        self.state.recomputing.set(true);
        let outcome = if self.needs_recompute() {
            match self.compute(tracker) {
                Ok(()) => Ok(()),
                Err(error) => {
                    if let Some(handler) = &self.state.on_error {
                        handler(error);
                        Ok(())
                    } else {
                        tracker.throw_or_log("recompute", Some(self), error)
                    }
                }
            }
        } else {
            Ok(())
        };
        self.state.recomputing.set(false);
        outcome
    }

    /// Run a lifecycle callback with the ambient current computation
    /// cleared, so reads inside the callback create no subscriptions.
    fn run_untracked(&self, f: LifecycleCallback) {
        match self.state.tracker.upgrade() {
            Some(tracker) => tracker.nonreactive(|| f(self)),
            None => f(self),
        }
    }
}

impl Clone for Computation {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .field("stopped", &self.state.stopped.get())
            .field("invalidated", &self.state.invalidated.get())
            .field("first_run", &self.state.first_run.get())
            .finish()
    }
}

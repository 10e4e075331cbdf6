//! Tracker Runtime
//!
//! The tracker is the central coordinator of the reactive system. It
//! owns the computation registry, the pending-recompute queue, the
//! ambient "current computation" pointer, and the flush engine that
//! drains invalidated computations to a fixed point.
//!
//! # How It Works
//!
//! 1. `autorun` creates a computation and runs it once. Dependencies
//!    read during the run record the computation as a subscriber.
//!
//! 2. When a dependency changes, its subscribers are invalidated and
//!    enqueued, and a flush is requested from the installed scheduling
//!    strategy.
//!
//! 3. A flush drains the queue FIFO. A computation that re-invalidates
//!    itself during its own run is requeued at the *front*, so it
//!    reaches a fixed point before unrelated siblings proceed. Once the
//!    queue is empty, after-flush callbacks run one at a time, each
//!    followed by a re-check of the queue.
//!
//! 4. Deferred flushes may yield early (recompute-count limit, or the
//!    frame-time budget when the frame strategy is installed), leaving
//!    the remainder queued for the next scheduling opportunity. A
//!    synchronous [`flush`](Tracker::flush) always runs to completion.
//!
//! # Concurrency Model
//!
//! The runtime is single-threaded and cooperative. All shared state
//! lives in `Cell`/`RefCell` fields; correctness rests on the re-entrant
//! flag guards (`in_flush`, `in_compute`, `recomputing`), not on locks.
//! Nested "currently running" contexts nest via save/restore, never
//! concurrently.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{BoxError, TrackerError};
use crate::reactive::computation::{Computation, ComputationFn, ComputationId, ErrorHandler};
use crate::schedule::{
    DeferredStrategy, FlushStrategy, FrameBudget, FrameClock, ScheduleReason,
    MAX_RECOMPUTES_PER_DRAIN,
};

/// Options accepted by [`Tracker::autorun_with`].
#[derive(Default)]
pub struct AutorunOptions {
    /// Diagnostic label for the computation, used by slow-computation
    /// warnings and error logs.
    pub name: Option<&'static str>,

    /// Handler invoked with recompute errors instead of logging them.
    /// First-run errors still propagate to the `autorun` caller.
    pub on_error: Option<ErrorHandler>,
}

/// Options accepted by [`Tracker::flush_with`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FlushOptions {
    /// Abort the drain by returning the first computation error instead
    /// of logging it. The queue is still fully drained by an automatic
    /// non-escalating follow-up pass before the error is returned.
    pub throw_first_error: bool,
}

type AfterFlushCallback = Box<dyn FnOnce() -> Result<(), BoxError>>;

/// How far a drain attempt may go before yielding.
pub(crate) enum DrainLimit<'a> {
    /// Run to completion; never yield.
    None,

    /// Yield after more than `max` recomputes (baseline deferred drain).
    Count(usize),

    /// Yield on the recompute count or the wall-clock budget, whichever
    /// trips first (frame-budget drain).
    Budget {
        budget: &'a FrameBudget,
        clock: &'a dyn FrameClock,
    },
}

/// The reactive runtime. Cheap to clone; clones share state.
///
/// All reactive objects hold a [`WeakTracker`] back-reference, so
/// dropping the last `Tracker` handle shuts the system down without
/// reference cycles.
pub struct Tracker {
    state: Rc<TrackerState>,
}

/// Weak counterpart of [`Tracker`].
#[derive(Clone)]
pub struct WeakTracker {
    state: Weak<TrackerState>,
}

impl WeakTracker {
    /// Upgrade to a full handle, if the runtime is still alive.
    pub fn upgrade(&self) -> Option<Tracker> {
        self.state.upgrade().map(|state| Tracker { state })
    }
}

struct TrackerState {
    next_id: Cell<u64>,

    /// Registry of all live computations, for enumeration and
    /// debugging. A computation leaves the registry when stopped.
    computations: RefCell<IndexMap<ComputationId, Computation>>,

    /// Computations whose reruns we should perform at flush time.
    pending: RefCell<VecDeque<Computation>>,

    /// The innermost computation currently executing, if any. This is
    /// the computation that gains subscriptions when dependencies are
    /// read.
    current: RefCell<Option<Computation>>,

    /// `true` if a flush is scheduled or running.
    will_flush: Cell<bool>,
    /// `true` while a flush is draining.
    in_flush: Cell<bool>,
    /// `true` while a computation body is executing. Unlike the ambient
    /// current computation, this stays set inside `nonreactive`.
    in_compute: Cell<bool>,
    /// `true` if the running flush escalates the first error.
    throw_first_error: Cell<bool>,

    after_flush: RefCell<VecDeque<AfterFlushCallback>>,

    strategy: RefCell<Rc<dyn FlushStrategy>>,

    /// Errors expected by a test; each one consumes a count instead of
    /// reaching the log sink.
    suppressed_errors: Cell<usize>,
}

impl Tracker {
    /// Create a runtime with the baseline deferred flush strategy
    /// installed.
    pub fn new() -> Self {
        Self {
            state: Rc::new(TrackerState {
                next_id: Cell::new(1),
                computations: RefCell::new(IndexMap::new()),
                pending: RefCell::new(VecDeque::new()),
                current: RefCell::new(None),
                will_flush: Cell::new(false),
                in_flush: Cell::new(false),
                in_compute: Cell::new(false),
                throw_first_error: Cell::new(false),
                after_flush: RefCell::new(VecDeque::new()),
                strategy: RefCell::new(Rc::new(DeferredStrategy::new())),
                suppressed_errors: Cell::new(0),
            }),
        }
    }

    /// Get a weak handle to this runtime.
    pub fn downgrade(&self) -> WeakTracker {
        WeakTracker {
            state: Rc::downgrade(&self.state),
        }
    }

    /// True if there is a current computation, meaning reads of reactive
    /// data sources will create subscriptions.
    pub fn active(&self) -> bool {
        self.state.current.borrow().is_some()
    }

    /// The innermost computation currently executing, if any.
    pub fn current_computation(&self) -> Option<Computation> {
        self.state.current.borrow().clone()
    }

    /// Run `f` now and rerun it whenever its dependencies change.
    ///
    /// The body is infallible; use [`try_autorun`](Self::try_autorun)
    /// for fallible bodies.
    pub fn autorun(&self, f: impl Fn(&Computation) + 'static) -> Computation {
        let wrapped = move |computation: &Computation| {
            f(computation);
            Ok(())
        };
        match self.autorun_with(AutorunOptions::default(), wrapped) {
            Ok(computation) => computation,
            Err(_) => unreachable!("infallible computation body reported an error"),
        }
    }

    /// Fallible variant of [`autorun`](Self::autorun). A failed first
    /// run stops the computation and returns the error.
    pub fn try_autorun(
        &self,
        f: impl Fn(&Computation) -> Result<(), BoxError> + 'static,
    ) -> Result<Computation, TrackerError> {
        self.autorun_with(AutorunOptions::default(), f)
    }

    /// Create a computation with a diagnostic name and/or an error
    /// handler.
    pub fn autorun_with(
        &self,
        options: AutorunOptions,
        f: impl Fn(&Computation) -> Result<(), BoxError> + 'static,
    ) -> Result<Computation, TrackerError> {
        let parent = self.current_computation().map(|c| c.id());
        let func: Rc<ComputationFn> = Rc::new(f);
        let computation = Computation::new(self, func, parent, options.name, options.on_error)
            .map_err(TrackerError::FirstRun)?;

        // A computation created inside another is stopped when its
        // creator is next invalidated.
        if let Some(current) = self.current_computation() {
            let child = computation.clone();
            current.on_invalidate(move |_| child.stop());
        }

        Ok(computation)
    }

    /// Run `f` with no current computation, so reads of reactive data
    /// sources inside it create no subscriptions. The previous ambient
    /// computation is restored afterward, even on early return.
    pub fn nonreactive<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.state.current.borrow_mut().take();
        let _guard = RestoreCurrent {
            tracker: self,
            previous: Some(previous),
        };
        f()
    }

    /// Register an invalidation callback on the ambient computation.
    ///
    /// Fails with [`TrackerError::NoCurrentComputation`] if none is
    /// active.
    pub fn on_invalidate(
        &self,
        f: impl FnOnce(&Computation) + 'static,
    ) -> Result<(), TrackerError> {
        let current = self
            .current_computation()
            .ok_or(TrackerError::NoCurrentComputation)?;
        current.on_invalidate(f);
        Ok(())
    }

    /// Process all reactive updates immediately: rerun every invalidated
    /// computation and run every after-flush callback, to a fixed point.
    ///
    /// Calling this from inside a flush or inside a computation body is
    /// a programming error and fails fast without touching the runtime
    /// flags.
    pub fn flush(&self) -> Result<(), TrackerError> {
        self.flush_with(FlushOptions::default())
    }

    /// [`flush`](Self::flush) with options.
    pub fn flush_with(&self, options: FlushOptions) -> Result<(), TrackerError> {
        self.run_flush(true, options.throw_first_error, DrainLimit::None)
    }

    /// Schedule `f` to run once the pending queue next drains. Errors
    /// from the callback are logged and never interrupt the drain.
    pub fn after_flush(&self, f: impl FnOnce() + 'static) {
        self.try_after_flush(move || {
            f();
            Ok(())
        });
    }

    /// Fallible variant of [`after_flush`](Self::after_flush).
    pub fn try_after_flush(&self, f: impl FnOnce() -> Result<(), BoxError> + 'static) {
        self.state.after_flush.borrow_mut().push_back(Box::new(f));
        self.require_flush();
    }

    /// Install a flush scheduling strategy. This is how a host with a
    /// frame clock opts into budget-aware flushing.
    pub fn set_flush_strategy(&self, strategy: Rc<dyn FlushStrategy>) {
        *self.state.strategy.borrow_mut() = strategy;
    }

    /// Expect `count` upcoming computation errors: each one is consumed
    /// silently instead of reaching the log sink. Intended for tests
    /// that intentionally provoke recompute failures.
    pub fn suppress_expected_errors(&self, count: usize) {
        self.state
            .suppressed_errors
            .set(self.state.suppressed_errors.get() + count);
    }

    /// Look up a live computation by id.
    pub fn computation(&self, id: ComputationId) -> Option<Computation> {
        self.state.computations.borrow().get(&id).cloned()
    }

    /// Number of live (unstopped) computations.
    pub fn computation_count(&self) -> usize {
        self.state.computations.borrow().len()
    }

    // ------------------------------------------------------------------
    // Crate-internal surface used by Computation, Dependency, and the
    // scheduling strategies.
    // ------------------------------------------------------------------

    pub(crate) fn next_computation_id(&self) -> ComputationId {
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);
        ComputationId::from_raw(id)
    }

    pub(crate) fn register(&self, computation: &Computation) {
        self.state
            .computations
            .borrow_mut()
            .insert(computation.id(), computation.clone());
    }

    pub(crate) fn unregister(&self, id: ComputationId) {
        self.state.computations.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn enqueue(&self, computation: Computation) {
        self.state.pending.borrow_mut().push_back(computation);
    }

    /// Ask the installed strategy for a drain attempt, unless one is
    /// already scheduled or running.
    pub(crate) fn require_flush(&self) {
        self.require_flush_with(ScheduleReason::Requested);
    }

    fn require_flush_with(&self, reason: ScheduleReason) {
        if self.state.will_flush.get() {
            return;
        }
        self.state.will_flush.set(true);
        let strategy = Rc::clone(&self.state.strategy.borrow());
        strategy.schedule(self, reason);
    }

    /// Enter a computation body: set it as the ambient current
    /// computation and raise `in_compute`. Both are restored when the
    /// returned guard drops.
    pub(crate) fn enter_computation(&self, computation: &Computation) -> ComputeGuard<'_> {
        let previous = self
            .state
            .current
            .borrow_mut()
            .replace(computation.clone());
        let was_computing = self.state.in_compute.replace(true);
        ComputeGuard {
            tracker: self,
            previous,
            was_computing,
        }
    }

    /// Route a computation error: escalate it when the running flush
    /// asked for that, otherwise log it.
    pub(crate) fn throw_or_log(
        &self,
        from: &str,
        computation: Option<&Computation>,
        error: BoxError,
    ) -> Result<(), BoxError> {
        if self.state.throw_first_error.get() {
            return Err(error);
        }
        self.log_error(from, computation, &error);
        Ok(())
    }

    fn log_error(&self, from: &str, computation: Option<&Computation>, error: &BoxError) {
        let suppressed = self.state.suppressed_errors.get();
        if suppressed > 0 {
            self.state.suppressed_errors.set(suppressed - 1);
            return;
        }
        match computation {
            Some(c) => tracing::error!(
                id = c.id().raw(),
                name = c.name().unwrap_or("<unnamed>"),
                error = %error,
                "exception from {from} function"
            ),
            None => tracing::error!(error = %error, "exception from {from} function"),
        }
    }

    /// Deferred drain attempt on behalf of the baseline strategy.
    pub(crate) fn run_deferred_flush(&self) -> Result<(), TrackerError> {
        self.run_flush(false, false, DrainLimit::Count(MAX_RECOMPUTES_PER_DRAIN))
    }

    /// Budgeted drain attempt on behalf of the frame strategy.
    pub(crate) fn run_budgeted_flush(
        &self,
        clock: &dyn FrameClock,
        budget: &FrameBudget,
    ) -> Result<(), TrackerError> {
        self.run_flush(false, false, DrainLimit::Budget { budget, clock })
    }

    /// Run a flush: guard flags, drain, and handle escalation and
    /// rescheduling.
    fn run_flush(
        &self,
        finish_synchronously: bool,
        throw_first_error: bool,
        limit: DrainLimit<'_>,
    ) -> Result<(), TrackerError> {
        if self.state.in_flush.get() {
            return Err(TrackerError::FlushInFlush);
        }
        if self.state.in_compute.get() {
            return Err(TrackerError::FlushInCompute);
        }

        self.state.in_flush.set(true);
        self.state.will_flush.set(true);
        self.state.throw_first_error.set(throw_first_error);

        match self.drain(&limit) {
            Err(error) => {
                // Escalation aborted the drain. Finish the remaining
                // work with escalation disabled before surfacing the
                // error, so the queue still fully drains for this flush
                // request.
                self.state.in_flush.set(false);
                self.state.throw_first_error.set(false);
                let followup = if finish_synchronously {
                    DrainLimit::None
                } else {
                    DrainLimit::Count(MAX_RECOMPUTES_PER_DRAIN)
                };
                if let Err(followup_error) = self.run_flush(finish_synchronously, false, followup) {
                    tracing::error!(error = %followup_error, "follow-up flush failed");
                }
                Err(TrackerError::Computation(error))
            }
            Ok(yielded) => {
                self.state.will_flush.set(false);
                self.state.in_flush.set(false);
                self.state.throw_first_error.set(false);
                if self.has_pending_work() {
                    // Only a limited drain can leave work behind; ask
                    // the strategy to resume, telling it why we yielded.
                    assert!(
                        !finish_synchronously,
                        "synchronous flush returned with work pending"
                    );
                    self.require_flush_with(yielded.unwrap_or(ScheduleReason::Requested));
                }
                Ok(())
            }
        }
    }

    /// The core drain loop, shared by all flush entry points.
    ///
    /// Returns `Ok(None)` when both the pending queue and the
    /// after-flush list are empty, `Ok(Some(reason))` on an early yield,
    /// and `Err` only when escalating the first computation error.
    fn drain(&self, limit: &DrainLimit<'_>) -> Result<Option<ScheduleReason>, BoxError> {
        let flush_started = match limit {
            DrainLimit::Budget { clock, .. } => clock.now(),
            _ => 0,
        };
        let mut recomputed = 0usize;

        loop {
            // Recompute all pending computations.
            loop {
                let next = self.state.pending.borrow_mut().pop_front();
                let Some(computation) = next else { break };

                let computation_started = match limit {
                    DrainLimit::Budget { clock, .. } => clock.now(),
                    _ => 0,
                };

                computation.recompute(self)?;

                if computation.needs_recompute() {
                    // The run invalidated itself again; let it reach a
                    // fixed point before its siblings proceed.
                    self.state.pending.borrow_mut().push_front(computation.clone());
                }
                recomputed += 1;

                match limit {
                    DrainLimit::None => {}
                    DrainLimit::Count(max) => {
                        if recomputed > *max {
                            return Ok(Some(ScheduleReason::RecomputeLimit));
                        }
                    }
                    DrainLimit::Budget { budget, clock } => {
                        if let Some(warn_after) = budget.warn_after_ms {
                            let took = clock.now().saturating_sub(computation_started);
                            if took > warn_after {
                                tracing::warn!(
                                    id = computation.id().raw(),
                                    name = computation.name().unwrap_or("<unnamed>"),
                                    elapsed_ms = took,
                                    "computation ran long enough to endanger the frame budget"
                                );
                            }
                        }
                        if recomputed > budget.max_recomputes {
                            tracing::debug!(
                                recomputed,
                                pending = self.state.pending.borrow().len(),
                                "splitting flush on recompute count"
                            );
                            return Ok(Some(ScheduleReason::RecomputeLimit));
                        }
                        let elapsed = clock.now().saturating_sub(flush_started);
                        if elapsed > budget.max_flush_ms {
                            tracing::debug!(
                                elapsed_ms = elapsed,
                                pending = self.state.pending.borrow().len(),
                                "splitting flush on time budget"
                            );
                            return Ok(Some(ScheduleReason::TimeBudget));
                        }
                    }
                }
            }

            // Run one after-flush callback; it may invalidate more
            // computations, so the queue is rechecked before the next
            // callback runs.
            let callback = self.state.after_flush.borrow_mut().pop_front();
            let Some(callback) = callback else {
                // Pending queue and after-flush list are both empty.
                break;
            };
            if let Err(error) = callback() {
                self.log_error("after_flush", None, &error);
            }
        }

        Ok(None)
    }

    fn has_pending_work(&self) -> bool {
        !self.state.pending.borrow().is_empty() || !self.state.after_flush.borrow().is_empty()
    }
}

impl Clone for Tracker {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("computations", &self.computation_count())
            .field("pending", &self.state.pending.borrow().len())
            .field("will_flush", &self.state.will_flush.get())
            .field("in_flush", &self.state.in_flush.get())
            .field("in_compute", &self.state.in_compute.get())
            .finish()
    }
}

/// Restores the ambient current computation and the `in_compute` flag
/// when a computation body exits, even on early return.
pub(crate) struct ComputeGuard<'a> {
    tracker: &'a Tracker,
    previous: Option<Computation>,
    was_computing: bool,
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        *self.tracker.state.current.borrow_mut() = self.previous.take();
        self.tracker.state.in_compute.set(self.was_computing);
    }
}

/// Restores the ambient current computation when `nonreactive` exits.
struct RestoreCurrent<'a> {
    tracker: &'a Tracker,
    previous: Option<Option<Computation>>,
}

impl Drop for RestoreCurrent<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.tracker.state.current.borrow_mut() = previous;
        }
    }
}

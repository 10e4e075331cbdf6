//! Frame-budget flush strategy.
//!
//! Hosts that drive a fixed-rate render loop cannot afford a reactive
//! flush that runs arbitrarily long: every millisecond spent recomputing
//! is a millisecond stolen from the frame. This strategy caps each drain
//! attempt by wall-clock time and by recompute count, and resumes the
//! remainder later.
//!
//! # Rescheduling Policy
//!
//! The two yield triggers resume differently, on purpose:
//!
//! - Time-budget yields (the common case) resume on the clock's *next
//!   tick*, so flush resumption rides the host's own frame cadence
//!   instead of racing it with a timer.
//!
//! - Recompute-count yields fall back to a plain short-delay timer;
//!   hitting the count limit inside a 2 ms budget means the work items
//!   are tiny and plentiful, and a timer gives the event loop room.
//!
//! # Diagnostics
//!
//! A drain can only overrun its budget by the duration of one
//! computation, since computations are never interrupted mid-run. The
//! optional warn threshold flags any single computation slow enough to
//! make that overrun matter, so operators can find bodies that endanger
//! the frame.

use std::rc::Rc;

use crate::reactive::Tracker;
use crate::schedule::strategy::{FlushStrategy, ScheduleReason};

/// Wall-clock budget for one drain attempt, in clock milliseconds.
/// Deliberately a small fraction of one frame.
pub const MAX_FLUSH_TIME_MS: u64 = 2;

/// A single computation running longer than this gets a warning.
pub const SLOW_COMPUTATION_WARN_MS: u64 = 5;

/// Recompute-count limit per drain attempt, shared with the baseline
/// deferred drain.
pub const MAX_RECOMPUTES_PER_DRAIN: usize = 1000;

/// Timer delay used to resume after a recompute-count yield.
pub const RETRY_DELAY_MS: u64 = 10;

/// The host's frame clock: a time source plus two ways of getting a
/// callback invoked later.
pub trait FrameClock {
    /// Current time in milliseconds on the frame timeline.
    fn now(&self) -> u64;

    /// Run `callback` once, after roughly `delay_ms` milliseconds.
    fn set_timeout(&self, delay_ms: u64, callback: Box<dyn FnOnce()>);

    /// Run `callback` once, on the next tick of the frame loop.
    fn request_tick(&self, callback: Box<dyn FnOnce()>);
}

/// Limits applied to one budgeted drain attempt.
#[derive(Debug, Clone)]
pub struct FrameBudget {
    /// Yield after more than this many recomputes.
    pub max_recomputes: usize,

    /// Yield once the attempt has run longer than this many clock
    /// milliseconds.
    pub max_flush_ms: u64,

    /// Warn about any single computation running longer than this.
    /// `None` disables the diagnostic.
    pub warn_after_ms: Option<u64>,

    /// Timer delay for resuming after a recompute-count yield.
    pub retry_delay_ms: u64,
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self {
            max_recomputes: MAX_RECOMPUTES_PER_DRAIN,
            max_flush_ms: MAX_FLUSH_TIME_MS,
            warn_after_ms: Some(SLOW_COMPUTATION_WARN_MS),
            retry_delay_ms: RETRY_DELAY_MS,
        }
    }
}

/// Budget-aware flush strategy for hosts with a frame clock.
pub struct FrameBudgetStrategy {
    clock: Rc<dyn FrameClock>,
    budget: FrameBudget,
}

impl FrameBudgetStrategy {
    /// Create a strategy with the default budget.
    pub fn new(clock: Rc<dyn FrameClock>) -> Self {
        Self::with_budget(clock, FrameBudget::default())
    }

    /// Create a strategy with an explicit budget.
    pub fn with_budget(clock: Rc<dyn FrameClock>, budget: FrameBudget) -> Self {
        Self { clock, budget }
    }

    /// The budget applied to each drain attempt.
    pub fn budget(&self) -> &FrameBudget {
        &self.budget
    }
}

impl FlushStrategy for FrameBudgetStrategy {
    fn schedule(&self, tracker: &Tracker, reason: ScheduleReason) {
        let weak = tracker.downgrade();
        let clock = Rc::clone(&self.clock);
        let budget = self.budget.clone();
        let run: Box<dyn FnOnce()> = Box::new(move || {
            let Some(tracker) = weak.upgrade() else {
                return;
            };
            if let Err(error) = tracker.run_budgeted_flush(&*clock, &budget) {
                tracing::error!(error = %error, "budgeted flush failed");
            }
        });

        match reason {
            // Fresh request: run as soon as the clock allows.
            ScheduleReason::Requested => self.clock.set_timeout(0, run),
            // Count yield: plain timer fallback.
            ScheduleReason::RecomputeLimit => self.clock.set_timeout(self.budget.retry_delay_ms, run),
            // Time yield: resume with the next frame.
            ScheduleReason::TimeBudget => self.clock.request_tick(run),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::{FrameBudget, FrameBudgetStrategy, FrameClock};
    use crate::reactive::{Dependency, Tracker};

    /// Hand-driven clock: timers and ticks queue up until the test
    /// fires them.
    #[derive(Default)]
    struct ManualClock {
        now: Cell<u64>,
        timers: RefCell<Vec<(u64, Box<dyn FnOnce()>)>>,
        ticks: RefCell<Vec<Box<dyn FnOnce()>>>,
    }

    impl ManualClock {
        fn advance(&self, ms: u64) {
            self.now.set(self.now.get() + ms);
        }

        fn timer_delays(&self) -> Vec<u64> {
            self.timers.borrow().iter().map(|(delay, _)| *delay).collect()
        }

        fn tick_count(&self) -> usize {
            self.ticks.borrow().len()
        }

        /// Run all currently queued timers. Callbacks may queue new
        /// timers; those wait for the next call.
        fn fire_timers(&self) {
            let timers = std::mem::take(&mut *self.timers.borrow_mut());
            for (_, callback) in timers {
                callback();
            }
        }

        /// Deliver one frame tick.
        fn fire_tick(&self) {
            let ticks = std::mem::take(&mut *self.ticks.borrow_mut());
            for callback in ticks {
                callback();
            }
        }
    }

    impl FrameClock for ManualClock {
        fn now(&self) -> u64 {
            self.now.get()
        }

        fn set_timeout(&self, delay_ms: u64, callback: Box<dyn FnOnce()>) {
            self.timers.borrow_mut().push((delay_ms, callback));
        }

        fn request_tick(&self, callback: Box<dyn FnOnce()>) {
            self.ticks.borrow_mut().push(callback);
        }
    }

    fn tracker_with_clock(budget: FrameBudget) -> (Tracker, Rc<ManualClock>) {
        let tracker = Tracker::new();
        let clock = Rc::new(ManualClock::default());
        tracker.set_flush_strategy(Rc::new(FrameBudgetStrategy::with_budget(
            clock.clone(),
            budget,
        )));
        (tracker, clock)
    }

    #[test]
    fn requested_flush_runs_on_a_zero_delay_timer() {
        let (tracker, clock) = tracker_with_clock(FrameBudget::default());
        let dependency = Dependency::new(&tracker);
        let runs = Rc::new(Cell::new(0));

        let (dep, runs_c) = (dependency.clone(), runs.clone());
        tracker.autorun(move |_| {
            dep.depend();
            runs_c.set(runs_c.get() + 1);
        });

        dependency.changed();
        assert_eq!(runs.get(), 1);
        assert_eq!(clock.timer_delays(), vec![0]);

        clock.fire_timers();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn time_budget_yield_resumes_on_the_next_tick() {
        let (tracker, clock) = tracker_with_clock(FrameBudget {
            max_flush_ms: 2,
            warn_after_ms: None,
            ..FrameBudget::default()
        });
        let dependency = Dependency::new(&tracker);
        let first_runs = Rc::new(Cell::new(0));
        let second_runs = Rc::new(Cell::new(0));

        // Each body burns 3 ms of clock time, blowing the 2 ms budget
        // after a single recompute.
        let (dep, clock_c, runs_c) = (dependency.clone(), clock.clone(), first_runs.clone());
        tracker.autorun(move |_| {
            dep.depend();
            clock_c.advance(3);
            runs_c.set(runs_c.get() + 1);
        });
        let (dep, clock_c, runs_c) = (dependency.clone(), clock.clone(), second_runs.clone());
        tracker.autorun(move |_| {
            dep.depend();
            clock_c.advance(3);
            runs_c.set(runs_c.get() + 1);
        });

        dependency.changed();
        clock.fire_timers();

        // One recompute happened, then the drain yielded to the frame.
        assert_eq!(first_runs.get(), 2);
        assert_eq!(second_runs.get(), 1);
        assert_eq!(clock.tick_count(), 1);

        clock.fire_tick();
        assert_eq!(second_runs.get(), 2);
        assert_eq!(clock.tick_count(), 0);
    }

    #[test]
    fn recompute_limit_yield_falls_back_to_a_retry_timer() {
        let (tracker, clock) = tracker_with_clock(FrameBudget {
            max_recomputes: 1,
            retry_delay_ms: 10,
            ..FrameBudget::default()
        });
        let dependency = Dependency::new(&tracker);
        let total_runs = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let (dep, runs_c) = (dependency.clone(), total_runs.clone());
            tracker.autorun(move |_| {
                dep.depend();
                runs_c.set(runs_c.get() + 1);
            });
        }
        assert_eq!(total_runs.get(), 3);

        dependency.changed();
        clock.fire_timers();

        // The drain yielded on the count limit with work remaining and
        // queued a retry timer, not a tick.
        assert_eq!(clock.tick_count(), 0);
        assert_eq!(clock.timer_delays(), vec![10]);
        assert!(total_runs.get() < 6);

        // Retries eventually settle everything.
        while !clock.timer_delays().is_empty() {
            clock.fire_timers();
        }
        assert_eq!(total_runs.get(), 6);
    }

    #[test]
    fn yielded_work_keeps_queue_order() {
        let (tracker, clock) = tracker_with_clock(FrameBudget {
            max_recomputes: 1,
            ..FrameBudget::default()
        });
        let dependency = Dependency::new(&tracker);
        let order = Rc::new(RefCell::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let (dep, order_c) = (dependency.clone(), order.clone());
            tracker.autorun(move |c| {
                dep.depend();
                if !c.first_run() {
                    order_c.borrow_mut().push(label);
                }
            });
        }

        dependency.changed();
        clock.fire_timers();
        while !clock.timer_delays().is_empty() {
            clock.fire_timers();
        }

        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn manual_flush_still_runs_to_completion() {
        let (tracker, clock) = tracker_with_clock(FrameBudget {
            max_flush_ms: 2,
            warn_after_ms: None,
            ..FrameBudget::default()
        });
        let dependency = Dependency::new(&tracker);
        let runs = Rc::new(Cell::new(0));

        for _ in 0..4 {
            let (dep, clock_c, runs_c) = (dependency.clone(), clock.clone(), runs.clone());
            tracker.autorun(move |_| {
                dep.depend();
                clock_c.advance(3);
                runs_c.set(runs_c.get() + 1);
            });
        }
        assert_eq!(runs.get(), 4);

        // A synchronous flush ignores the budget entirely.
        dependency.changed();
        tracker.flush().unwrap();
        assert_eq!(runs.get(), 8);
    }
}

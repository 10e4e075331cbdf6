//! Baseline deferred flush strategy.
//!
//! The library owns no event loop, so "flush as soon as possible" means
//! recording that a drain is wanted and letting the host pump it at the
//! next convenient point in its own loop. Hosts that want updates
//! applied immediately can simply call [`Tracker::flush`] instead; a
//! pump that finds nothing pending, or a pending drain that was already
//! satisfied by a manual flush, is a no-op.
//!
//! [`Tracker::flush`]: crate::reactive::Tracker::flush

use std::cell::{Cell, RefCell};

use crate::reactive::{Tracker, WeakTracker};
use crate::schedule::strategy::{FlushStrategy, ScheduleReason};

/// Records requested drains for the host to pump.
#[derive(Default)]
pub struct DeferredStrategy {
    pending: Cell<bool>,
    tracker: RefCell<Option<WeakTracker>>,
}

impl DeferredStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a drain has been requested and not yet pumped.
    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Run the pending drain attempt, if any.
    pub fn run_pending(&self) {
        if !self.pending.replace(false) {
            return;
        }
        let weak = self.tracker.borrow().clone();
        let Some(tracker) = weak.and_then(|weak| weak.upgrade()) else {
            return;
        };
        if let Err(error) = tracker.run_deferred_flush() {
            // Reachable only by pumping from inside a flush or a
            // computation body, which is host misuse.
            tracing::error!(error = %error, "deferred flush failed");
        }
    }
}

impl FlushStrategy for DeferredStrategy {
    fn schedule(&self, tracker: &Tracker, _reason: ScheduleReason) {
        self.tracker.borrow_mut().replace(tracker.downgrade());
        self.pending.set(true);
    }
}

//! The strategy seam between the flush engine and its host.

use crate::reactive::Tracker;

/// Why the tracker is asking for a drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleReason {
    /// Normal request: something was invalidated (or an after-flush
    /// callback was registered) and no flush is scheduled yet.
    Requested,

    /// The previous drain attempt yielded after hitting its
    /// recompute-count limit.
    RecomputeLimit,

    /// The previous drain attempt yielded after exceeding its
    /// wall-clock time budget.
    TimeBudget,
}

/// A policy deciding when a requested drain attempt actually runs.
///
/// The tracker calls [`schedule`](Self::schedule) at most once per
/// outstanding flush (guarded by its `will_flush` flag); the strategy
/// arranges for a drain to happen and may use `reason` to pick how soon.
pub trait FlushStrategy {
    /// Arrange for a drain attempt on `tracker`.
    fn schedule(&self, tracker: &Tracker, reason: ScheduleReason);
}

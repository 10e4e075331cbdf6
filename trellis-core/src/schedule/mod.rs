//! Flush Scheduling
//!
//! This module decides *when* a drain attempt runs; the drain loop
//! itself lives in the tracker and is shared by every strategy.
//!
//! # Strategies
//!
//! - [`DeferredStrategy`] is the baseline: a requested flush is recorded
//!   and performed as soon as the host pumps it. It yields only on the
//!   recompute-count limit.
//!
//! - [`FrameBudgetStrategy`] is for hosts with a fixed-rate render
//!   clock. Drain attempts are capped by a wall-clock budget that is a
//!   small fraction of one frame, so reactive updates never starve the
//!   render loop. A drain that yields on the time budget resumes on the
//!   clock's *next tick*, aligning with the host's frame cadence; a
//!   drain that yields on the recompute count falls back to a plain
//!   short-delay timer.
//!
//! Either way a yielded drain leaves the remainder of the pending queue
//! untouched (front preserved) for the next attempt, and a computation
//! is never interrupted mid-execution: one attempt overruns its budget
//! by at most the duration of a single computation.

mod deferred;
mod frame;
mod strategy;

pub use deferred::DeferredStrategy;
pub use frame::{
    FrameBudget, FrameBudgetStrategy, FrameClock, MAX_FLUSH_TIME_MS, MAX_RECOMPUTES_PER_DRAIN,
    RETRY_DELAY_MS, SLOW_COMPUTATION_WARN_MS,
};
pub use strategy::{FlushStrategy, ScheduleReason};

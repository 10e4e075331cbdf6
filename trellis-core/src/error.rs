//! Error types for the reactive runtime.
//!
//! Two kinds of failure flow through the runtime and they are kept
//! strictly apart:
//!
//! - **Misuse errors** are programming errors: flushing while a flush is
//!   already draining, flushing from inside a computation body, or
//!   registering an invalidation callback with no ambient computation.
//!   These are surfaced immediately as [`TrackerError`] values and are
//!   never retried.
//!
//! - **Computation errors** are runtime conditions: a computation body
//!   returned an error. They are routed to the computation's error
//!   handler if one is registered, otherwise logged. They only reach the
//!   caller when the flush was explicitly asked to escalate the first
//!   error, or when the computation's very first run fails.

use thiserror::Error;

/// The error type produced by computation bodies and after-flush
/// callbacks. The runtime never inspects it beyond logging.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Errors surfaced by the [`Tracker`](crate::reactive::Tracker) runtime.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A synchronous flush was requested while a flush was already
    /// draining. Nested flushes are a programming error.
    #[error("can't flush while already flushing")]
    FlushInFlush,

    /// A synchronous flush was requested from inside a running
    /// computation body.
    #[error("can't flush inside a computation")]
    FlushInCompute,

    /// `on_invalidate` was called at the tracker level with no ambient
    /// computation to attach the callback to.
    #[error("on_invalidate requires an active computation")]
    NoCurrentComputation,

    /// The first run of a computation failed. The computation has been
    /// stopped and removed from the registry.
    #[error("first run of computation failed: {0}")]
    FirstRun(BoxError),

    /// A computation failed while flushing with error escalation
    /// enabled. The remaining queue was still drained before this was
    /// returned.
    #[error("computation failed during flush: {0}")]
    Computation(BoxError),
}

//! Reactive Primitives
//!
//! This module implements the dependency-tracking core: dependencies,
//! computations, and the tracker runtime that coordinates them.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A [`Dependency`] is the subscriber set of one atomic unit of reactive
//! data. Reactive data sources create a Dependency per independently
//! changeable piece of data, call `depend()` when it is read, and
//! `changed()` when it is written.
//!
//! ## Computations
//!
//! A [`Computation`] is a re-runnable unit of work created with
//! [`Tracker::autorun`]. While its body runs, every dependency it reads
//! records it as a subscriber; when any of them changes, the computation
//! is invalidated and rerun at the next flush. Subscriptions are
//! re-established from scratch on every run, so a body that stops
//! reading a dependency stops reacting to it.
//!
//! ## The Tracker
//!
//! The [`Tracker`] is an explicit runtime object: it owns the
//! computation registry, the pending queue, the ambient
//! current-computation pointer, and the flush engine. Everything is
//! single-threaded and cooperative; see the module docs on
//! [`tracker`](self::tracker) internals and
//! [`schedule`](crate::schedule) for when flushes actually run.

mod computation;
mod dependency;
mod tracker;

pub use computation::{Computation, ComputationId, ErrorHandler};
pub use dependency::Dependency;
pub use tracker::{AutorunOptions, FlushOptions, Tracker, WeakTracker};

//! Trellis Core
//!
//! This crate provides the reactive dependency-tracking runtime for the
//! Trellis scene-binding layer. It implements:
//!
//! - Reactive primitives (dependencies, computations, the tracker)
//! - A flush engine that drains invalidated computations to a fixed
//!   point
//! - Pluggable flush scheduling, including a frame-budget strategy that
//!   never lets reactive work starve a host render loop
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: dependencies, computations, and the tracker runtime
//! - `schedule`: strategies deciding when a requested flush runs
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{Dependency, Tracker};
//!
//! let tracker = Tracker::new();
//! let dependency = Dependency::new(&tracker);
//!
//! // Run now, and rerun whenever `dependency` changes.
//! let dep = dependency.clone();
//! tracker.autorun(move |_| {
//!     dep.depend();
//!     println!("data changed");
//! });
//!
//! dependency.changed();
//! tracker.flush()?;
//! // Prints: "data changed"
//! ```

pub mod error;
pub mod reactive;
pub mod schedule;

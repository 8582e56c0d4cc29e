//! The execution side of the op graph.
//!
//! Numeric evaluation is delegated to an [`Executor`] supplied by the
//! caller; this crate only describes what to run.

pub mod executor;

pub use executor::{Executor, Feeds, RuntimeError, SessionRef};

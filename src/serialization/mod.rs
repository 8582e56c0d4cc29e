//! Storage of trained parameter values.
//!
//! The graph description only records topology. Values live in a
//! [`CheckpointStore`] keyed by parameter name, filled by
//! [`Model::save_weights`](crate::models::Model::save_weights) and read back by
//! [`Model::load_weights`](crate::models::Model::load_weights).

pub mod checkpoint;

pub use checkpoint::{CheckpointStore, MemoryCheckpoint};

//! Host-side metrics computed from values fetched out of the executor.

pub mod classification;
pub mod running;

pub use classification::{argmax_rows, error_rate, sparse_cross_entropy};
pub use running::RunningMean;

//! Neural renderer: a UV map in, an image out, through a learned texture.
//!
//! The training objectives live in their own modules and share the
//! training tensors prepared by [`renderer`].

pub mod abs_loss;
pub mod masked_mse_loss;
pub mod renderer;

pub use abs_loss::ABS_LOSS;
pub use masked_mse_loss::MASKED_MSE_LOSS;
pub use renderer::{NeuralRender, SAMPLED_TEXTURE};

//! # Layers
//!
//! Each layer appends a fixed pattern of op-graph nodes when called and owns
//! the variables it needs. Layers are shared as `Rc<dyn Layer>`; calling the
//! same handle twice shares its weights.
//!
//! ### Core
//! - [`InputLayer`]: placeholder or pipeline-backed input
//! - [`DenseLayer`]: fully connected
//! - [`ConvLayer`]: 2D convolution (NHWC)
//! - [`MaxPoolLayer`], [`FlattenLayer`], [`ActivationLayer`], [`DropoutLayer`]
//!
//! ### Merging and blocks
//! - [`ConcatLayer`], [`SumLayer`]
//! - [`InceptionC`]: Inception-ResNet-C composite block
//!
//! ### Rendering
//! - [`NeuralTextureLayer`]: learned texture sampled at UV coordinates
//!
//! ### Derived tensor operations
//! - [`DerivedLayer`]: shape-of and index-by-key
//!
//! ## Example
//!
//! ```ignore
//! use makiflow::graph::call;
//! use makiflow::nn::{DenseLayer, InputLayer};
//! use makiflow::tensor::GraphContext;
//!
//! let ctx = GraphContext::new_ref();
//! let x = InputLayer::input(&ctx, vec![16, 784], "input")?;
//! let x = call(Rc::new(DenseLayer::new(&ctx, 784, 100, "dense1")), &[&x])?;
//! ```

pub mod activations;
pub mod conv;
pub mod dense;
pub mod derived;
pub mod dropout;
pub mod inception;
pub mod input;
pub mod merge;
pub mod pooling;
pub mod reshape;
pub mod texture;

pub use activations::ActivationLayer;
pub use conv::{ConvConfig, ConvLayer};
pub use dense::{DenseConfig, DenseLayer};
pub use derived::{DerivedLayer, DerivedOp};
pub use dropout::DropoutLayer;
pub use inception::{InceptionC, InceptionCConfig};
pub use input::{InputLayer, InputParams, IteratorBinding};
pub use merge::{ConcatLayer, SumLayer};
pub use pooling::MaxPoolLayer;
pub use reshape::FlattenLayer;
pub use texture::{NeuralTextureConfig, NeuralTextureLayer};

use crate::graph::LayerRegistry;

/// Registers every layer of this module under its type tag.
pub fn register_builtin(registry: &mut LayerRegistry) {
    registry.register(input::INPUT_LAYER, InputLayer::build);
    registry.register(dense::DENSE_LAYER, DenseLayer::build);
    registry.register(conv::CONV_LAYER, ConvLayer::build);
    registry.register(pooling::MAX_POOL_LAYER, MaxPoolLayer::build);
    registry.register(activations::ACTIVATION_LAYER, ActivationLayer::build);
    registry.register(dropout::DROPOUT_LAYER, DropoutLayer::build);
    registry.register(reshape::FLATTEN_LAYER, FlattenLayer::build);
    registry.register(merge::CONCAT_LAYER, ConcatLayer::build);
    registry.register(merge::SUM_LAYER, SumLayer::build);
    registry.register(inception::INCEPTION_C, InceptionC::build);
    registry.register(texture::NEURAL_TEXTURE_LAYER, NeuralTextureLayer::build);
    registry.register(derived::SHAPE_LAYER, DerivedLayer::build_shape);
    registry.register(derived::INDEX_LAYER, DerivedLayer::build_index);
}

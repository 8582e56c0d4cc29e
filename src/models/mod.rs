//! Model wrappers binding a layer graph to a session and training routines.
//!
//! [`Model`] carries the shared lifecycle
//! (`Declared → Bound → TrainingPrepared → LossBuilt → Training`); the
//! variants add their losses and fit loops on top of it:
//!
//! - [`Classificator`]: logits output, sparse cross-entropy training
//! - [`NeuralRender`]: UV map to image, abs and masked MSE training

pub mod classificator;
pub mod model;
pub mod nn_render;
pub mod training;

use crate::asg::{AsgError, Shape};
use crate::graph::GraphError;
use crate::runtime::RuntimeError;
use thiserror::Error;

pub use classificator::Classificator;
pub use model::{LossSlot, Model, ModelState, Regularization, RestoredGraph};
pub use nn_render::NeuralRender;
pub use training::{FitConfig, TrainHistory};

pub type ModelResult<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no session is bound to the model")]
    NotBound,

    #[error("the generator is not set")]
    GeneratorNotSet,

    #[error("a session is already bound to the model")]
    AlreadyBound,

    #[error("cannot {0} after training has been prepared")]
    TrainingFrozen(&'static str),

    #[error("loss must be a scalar, got shape {0:?}")]
    NonScalarLoss(Option<Shape>),

    #[error("data mismatch: {0}")]
    DataMismatch(String),

    #[error("layer '{0}' is not part of the model")]
    UnknownLayer(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Asg(#[from] AsgError),
}

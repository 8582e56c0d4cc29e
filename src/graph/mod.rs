//! Tensor wrappers, the layer contract, and the graph builder/restorer.
//!
//! A [`MakiTensor`] remembers the layer that produced it and every tensor it
//! transitively depends on, so any output can rebuild its whole dependency
//! graph without a separate graph object. [`builder`] turns such a graph into
//! a flat JSON description and back.

pub mod builder;
pub mod layer;
pub mod maki_tensor;

use crate::asg::AsgError;
use thiserror::Error;

pub use builder::{
    collect, restore, serialize, CollectedGraph, LayerRecord, LayerRegistry, ModelDescription,
    ModelInfo, TensorRecord,
};
pub use layer::{call, ComputationMode, Layer, ParamKind, Parameter};
pub use maki_tensor::MakiTensor;

pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Construction-time and graph-integrity errors.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("duplicate {kind} name '{name}': names address graph elements and must be unique")]
    DuplicateName { kind: &'static str, name: String },

    #[error("record '{record}' references '{name}', which is not produced by any earlier record")]
    UnknownReference { record: String, name: String },

    #[error("unknown layer type '{0}'")]
    UnknownLayerType(String),

    #[error("invalid params for layer type '{layer_type}': {source}")]
    InvalidParams {
        layer_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("layer '{layer}': {reason}")]
    Shape { layer: String, reason: String },

    #[error("layer '{layer}' expects {expected} input(s), got {got}")]
    Arity { layer: String, expected: String, got: usize },

    #[error("tensor '{0}' is not part of the graph")]
    UnknownTensor(String),

    #[error("graph contains a cycle through '{0}'")]
    Cycle(String),

    #[error(transparent)]
    Asg(#[from] AsgError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

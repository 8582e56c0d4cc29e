//! Derived tensor operations: shape-of and index-by-key.
//!
//! Both are parameterless and share one layer type; the op is a closed enum
//! rather than arbitrary indexing code.

use crate::graph::builder::parse_params;
use crate::graph::layer::single_input;
use crate::graph::{ComputationMode, GraphResult, Layer};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const SHAPE_LAYER: &str = "ShapeLayer";
pub const INDEX_LAYER: &str = "IndexLayer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DerivedOp {
    /// Runtime shape of the input as an i32 vector.
    Shape,
    /// Element `key` along the first axis.
    Index { key: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedLayer {
    pub name: String,
    #[serde(flatten)]
    pub op: DerivedOp,
}

impl DerivedLayer {
    pub fn shape(name: &str) -> Self {
        Self { name: name.to_string(), op: DerivedOp::Shape }
    }

    pub fn index(name: &str, key: usize) -> Self {
        Self { name: name.to_string(), op: DerivedOp::Index { key } }
    }

    pub(crate) fn build_shape(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: DerivedLayer = parse_params(SHAPE_LAYER, params)?;
        Ok(Rc::new(layer))
    }

    pub(crate) fn build_index(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: DerivedLayer = parse_params(INDEX_LAYER, params)?;
        Ok(Rc::new(layer))
    }
}

impl Layer for DerivedLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_type(&self) -> &'static str {
        match self.op {
            DerivedOp::Shape => SHAPE_LAYER,
            DerivedOp::Index { .. } => INDEX_LAYER,
        }
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        let x = single_input(&self.name, inputs)?;
        Ok(match self.op {
            DerivedOp::Shape => x.shape_of()?,
            DerivedOp::Index { key } => x.index(key)?,
        })
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

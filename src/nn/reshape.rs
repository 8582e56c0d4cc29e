//! Shape-changing layers.

use crate::graph::builder::parse_params;
use crate::graph::layer::{input_shape, single_input};
use crate::graph::{ComputationMode, GraphResult, Layer};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const FLATTEN_LAYER: &str = "FlattenLayer";

/// `[N, d1, d2, ...] -> [N, d1 * d2 * ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenLayer {
    pub name: String,
}

impl FlattenLayer {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }

    pub(crate) fn build(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: FlattenLayer = parse_params(FLATTEN_LAYER, params)?;
        Ok(Rc::new(layer))
    }
}

impl Layer for FlattenLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_type(&self) -> &'static str {
        FLATTEN_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        let x = single_input(&self.name, inputs)?;
        let shape = input_shape(&self.name, x)?;
        let batch = shape.first().copied().unwrap_or(1);
        let rest: usize = shape.iter().skip(1).product();
        Ok(x.reshape(vec![batch, rest])?)
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

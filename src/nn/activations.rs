//! Standalone activation layer.

use crate::asg::Activation;
use crate::graph::builder::parse_params;
use crate::graph::layer::single_input;
use crate::graph::{ComputationMode, GraphResult, Layer};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const ACTIVATION_LAYER: &str = "ActivationLayer";

/// Applies an element-wise activation. Has no parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationLayer {
    pub name: String,
    pub activation: Activation,
}

impl ActivationLayer {
    pub fn new(name: &str, activation: Activation) -> Self {
        Self { name: name.to_string(), activation }
    }

    pub(crate) fn build(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: ActivationLayer = parse_params(ACTIVATION_LAYER, params)?;
        Ok(Rc::new(layer))
    }
}

impl Layer for ActivationLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_type(&self) -> &'static str {
        ACTIVATION_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        Ok(single_input(&self.name, inputs)?.activation(self.activation))
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

//! Fully connected layer.

use crate::asg::{Activation, InitType};
use crate::graph::builder::parse_params;
use crate::graph::layer::{input_shape, single_input};
use crate::graph::{ComputationMode, GraphError, GraphResult, Layer, ParamKind, Parameter};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const DENSE_LAYER: &str = "DenseLayer";

/// Configuration of a [`DenseLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseConfig {
    pub name: String,
    pub input_shape: usize,
    pub output_shape: usize,
    pub activation: Option<Activation>,
    pub use_bias: bool,
    pub init_type: InitType,
}

impl DenseConfig {
    /// ReLU activation, bias and He initialization by default.
    pub fn new(name: &str, input_shape: usize, output_shape: usize) -> Self {
        Self {
            name: name.to_string(),
            input_shape,
            output_shape,
            activation: Some(Activation::Relu),
            use_bias: true,
            init_type: InitType::He,
        }
    }

    pub fn with_activation(mut self, activation: Option<Activation>) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_init(mut self, init_type: InitType) -> Self {
        self.init_type = init_type;
        self
    }
}

/// `y = activation(x W + b)` over `[batch, input_shape]` inputs.
///
/// Parameters are registered as `{name}/weights` (`[in, out]`) and
/// `{name}/bias` (`[out]`).
#[derive(Debug)]
pub struct DenseLayer {
    pub config: DenseConfig,
    pub weights: Parameter,
    pub bias: Option<Parameter>,
}

impl DenseLayer {
    pub fn new(context: &ContextRef, input_shape: usize, output_shape: usize, name: &str) -> Self {
        Self::from_config(context, DenseConfig::new(name, input_shape, output_shape))
    }

    pub fn from_config(context: &ContextRef, config: DenseConfig) -> Self {
        let weights = Parameter::new(
            context,
            format!("{}/weights", config.name),
            vec![config.input_shape, config.output_shape],
            config.init_type,
            ParamKind::Weight,
        );
        let bias = config.use_bias.then(|| {
            Parameter::new(
                context,
                format!("{}/bias", config.name),
                vec![config.output_shape],
                InitType::Zeros,
                ParamKind::Bias,
            )
        });
        Self { config, weights, bias }
    }

    pub(crate) fn build(context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let config: DenseConfig = parse_params(DENSE_LAYER, params)?;
        Ok(Rc::new(Self::from_config(context, config)))
    }
}

impl Layer for DenseLayer {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn layer_type(&self) -> &'static str {
        DENSE_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        let x = single_input(&self.config.name, inputs)?;
        let shape = input_shape(&self.config.name, x)?;
        if shape.len() != 2 || shape[1] != self.config.input_shape {
            return Err(GraphError::Shape {
                layer: self.config.name.clone(),
                reason: format!("expected [batch, {}], got {:?}", self.config.input_shape, shape),
            });
        }
        let mut out = x.dot(&self.weights.tensor)?;
        if let Some(bias) = &self.bias {
            out = &out + &bias.tensor;
        }
        Ok(match self.config.activation {
            Some(activation) => out.activation(activation),
            None => out,
        })
    }

    fn parameters(&self) -> Vec<Parameter> {
        let mut params = vec![self.weights.clone()];
        params.extend(self.bias.clone());
        params
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }
}

//! Convolutional layer for NHWC feature maps.

use crate::asg::{Activation, InitType, Padding};
use crate::graph::builder::parse_params;
use crate::graph::layer::{input_shape, single_input};
use crate::graph::{ComputationMode, GraphError, GraphResult, Layer, ParamKind, Parameter};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const CONV_LAYER: &str = "ConvLayer";

/// Configuration for [`ConvLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvConfig {
    pub name: String,
    /// Kernel width.
    pub kw: usize,
    /// Kernel height.
    pub kh: usize,
    /// Input feature maps.
    pub in_f: usize,
    /// Output feature maps.
    pub out_f: usize,
    pub stride: usize,
    pub padding: Padding,
    pub activation: Option<Activation>,
    pub use_bias: bool,
    pub init_type: InitType,
}

impl ConvConfig {
    /// Stride 1, SAME padding, ReLU, bias, He init.
    pub fn new(name: &str, kw: usize, kh: usize, in_f: usize, out_f: usize) -> Self {
        Self {
            name: name.to_string(),
            kw,
            kh,
            in_f,
            out_f,
            stride: 1,
            padding: Padding::Same,
            activation: Some(Activation::Relu),
            use_bias: true,
            init_type: InitType::He,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
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

/// 2D convolution. Input `[N, H, W, in_f]`, output `[N, H', W', out_f]`.
///
/// Kernel `{name}/weights` is `[kh, kw, in_f, out_f]`, bias `{name}/bias` is `[out_f]`.
#[derive(Debug)]
pub struct ConvLayer {
    pub config: ConvConfig,
    pub weights: Parameter,
    pub bias: Option<Parameter>,
}

impl ConvLayer {
    pub fn new(context: &ContextRef, kw: usize, kh: usize, in_f: usize, out_f: usize, name: &str) -> Self {
        Self::from_config(context, ConvConfig::new(name, kw, kh, in_f, out_f))
    }

    pub fn from_config(context: &ContextRef, config: ConvConfig) -> Self {
        let weights = Parameter::new(
            context,
            format!("{}/weights", config.name),
            vec![config.kh, config.kw, config.in_f, config.out_f],
            config.init_type,
            ParamKind::Weight,
        );
        let bias = config.use_bias.then(|| {
            Parameter::new(
                context,
                format!("{}/bias", config.name),
                vec![config.out_f],
                InitType::Zeros,
                ParamKind::Bias,
            )
        });
        Self { config, weights, bias }
    }

    pub(crate) fn build(context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let config: ConvConfig = parse_params(CONV_LAYER, params)?;
        Ok(Rc::new(Self::from_config(context, config)))
    }
}

impl Layer for ConvLayer {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn layer_type(&self) -> &'static str {
        CONV_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        let x = single_input(&self.config.name, inputs)?;
        let shape = input_shape(&self.config.name, x)?;
        if shape.len() != 4 || shape[3] != self.config.in_f {
            return Err(GraphError::Shape {
                layer: self.config.name.clone(),
                reason: format!("expected [N, H, W, {}], got {:?}", self.config.in_f, shape),
            });
        }
        let stride = (self.config.stride, self.config.stride);
        let mut out = x.conv2d(&self.weights.tensor, stride, self.config.padding)?;
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

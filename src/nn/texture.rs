//! Learned neural texture sampled at UV coordinates.

use crate::asg::InitType;
use crate::graph::builder::parse_params;
use crate::graph::layer::single_input;
use crate::graph::{ComputationMode, GraphResult, Layer, ParamKind, Parameter};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const NEURAL_TEXTURE_LAYER: &str = "NeuralTextureLayer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralTextureConfig {
    pub name: String,
    pub texture_h: usize,
    pub texture_w: usize,
    pub channels: usize,
    pub init_type: InitType,
}

/// Holds a `[texture_h, texture_w, channels]` texture and samples it at the
/// UV map `[N, H, W, 2]` it is called on, giving `[N, H, W, channels]`.
#[derive(Debug)]
pub struct NeuralTextureLayer {
    pub config: NeuralTextureConfig,
    pub texture: Parameter,
}

impl NeuralTextureLayer {
    pub fn new(context: &ContextRef, texture_h: usize, texture_w: usize, channels: usize, name: &str) -> Self {
        Self::from_config(
            context,
            NeuralTextureConfig {
                name: name.to_string(),
                texture_h,
                texture_w,
                channels,
                init_type: InitType::XavierUniform,
            },
        )
    }

    pub fn from_config(context: &ContextRef, config: NeuralTextureConfig) -> Self {
        let texture = Parameter::new(
            context,
            format!("{}/texture", config.name),
            vec![config.texture_h, config.texture_w, config.channels],
            config.init_type,
            ParamKind::Texture,
        );
        Self { config, texture }
    }

    pub(crate) fn build(context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let config: NeuralTextureConfig = parse_params(NEURAL_TEXTURE_LAYER, params)?;
        Ok(Rc::new(Self::from_config(context, config)))
    }
}

impl Layer for NeuralTextureLayer {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn layer_type(&self) -> &'static str {
        NEURAL_TEXTURE_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        let uv = single_input(&self.config.name, inputs)?;
        Ok(Tensor::grid_sample(&self.texture.tensor, uv)?)
    }

    fn parameters(&self) -> Vec<Parameter> {
        vec![self.texture.clone()]
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }
}

//! Inception-ResNet-C block (arXiv:1602.07261).

use crate::asg::Activation;
use crate::graph::builder::parse_params;
use crate::graph::layer::single_input;
use crate::graph::{ComputationMode, GraphResult, Layer, Parameter};
use crate::nn::conv::{ConvConfig, ConvLayer};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const INCEPTION_C: &str = "ResnetInceptionBlockC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InceptionCConfig {
    pub name: String,
    /// Feature maps of the block input (and output).
    pub in_f: usize,
    /// Feature maps of conv1, conv2, conv3.
    pub out_f: [usize; 3],
    pub activation: Option<Activation>,
}

/// Composite block with a fixed internal wiring:
///
/// ```text
///          /-> conv_L_1 (1x1) -------------------------------\
/// input --|                                                   concat -> conv_after_conc (1x1) -> + input
///          \-> conv_R_1 (1x1) -> conv_R_2 (1x3) -> conv_R_3 (3x1) /
/// ```
///
/// Children are namespaced `{name}/...`, so their parameters are too.
#[derive(Debug)]
pub struct InceptionC {
    pub config: InceptionCConfig,
    conv_l_1: ConvLayer,
    conv_r_1: ConvLayer,
    conv_r_2: ConvLayer,
    conv_r_3: ConvLayer,
    conv_after_conc: ConvLayer,
}

impl InceptionC {
    pub fn new(context: &ContextRef, in_f: usize, out_f: [usize; 3], name: &str) -> Self {
        Self::from_config(
            context,
            InceptionCConfig { name: name.to_string(), in_f, out_f, activation: Some(Activation::Relu) },
        )
    }

    pub fn from_config(context: &ContextRef, config: InceptionCConfig) -> Self {
        let child = |suffix: &str, kw: usize, kh: usize, in_f: usize, out_f: usize, activation| {
            let name = format!("{}/{}", config.name, suffix);
            ConvLayer::from_config(context, ConvConfig::new(&name, kw, kh, in_f, out_f).with_activation(activation))
        };
        let [f1, f2, f3] = config.out_f;
        let act = config.activation;
        Self {
            conv_l_1: child("conv_L_1", 1, 1, config.in_f, f1, None),
            conv_r_1: child("conv_R_1", 1, 1, config.in_f, f1, None),
            conv_r_2: child("conv_R_2", 1, 3, f1, f2, act),
            conv_r_3: child("conv_R_3", 3, 1, f2, f3, act),
            conv_after_conc: child("conv_after_conc", 1, 1, f1 + f3, config.in_f, None),
            config,
        }
    }

    /// Children in evaluation order.
    pub fn sub_layers(&self) -> [&ConvLayer; 5] {
        [&self.conv_l_1, &self.conv_r_1, &self.conv_r_2, &self.conv_r_3, &self.conv_after_conc]
    }

    pub(crate) fn build(context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let config: InceptionCConfig = parse_params(INCEPTION_C, params)?;
        Ok(Rc::new(Self::from_config(context, config)))
    }
}

impl Layer for InceptionC {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn layer_type(&self) -> &'static str {
        INCEPTION_C
    }

    fn forward(&self, inputs: &[Tensor], mode: ComputationMode) -> GraphResult<Tensor> {
        let x = single_input(&self.config.name, inputs)?;

        let left = self.conv_l_1.forward(&[x.clone()], mode)?;

        let right = self.conv_r_1.forward(&[x.clone()], mode)?;
        let right = self.conv_r_2.forward(&[right], mode)?;
        let right = self.conv_r_3.forward(&[right], mode)?;

        let merged = Tensor::concat(&[left, right], 3)?;
        let merged = self.conv_after_conc.forward(&[merged], mode)?;
        Ok(&merged + x)
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.sub_layers().iter().flat_map(|l| l.parameters()).collect()
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }
}

//! Pooling layers.

use crate::asg::Padding;
use crate::graph::builder::parse_params;
use crate::graph::layer::single_input;
use crate::graph::{ComputationMode, GraphResult, Layer};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const MAX_POOL_LAYER: &str = "MaxPoolLayer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxPoolLayer {
    pub name: String,
    pub ksize: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
}

impl MaxPoolLayer {
    /// 2x2 window, stride 2, SAME padding.
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ksize: (2, 2), strides: (2, 2), padding: Padding::Same }
    }

    pub fn with_ksize(mut self, ksize: (usize, usize)) -> Self {
        self.ksize = ksize;
        self
    }

    pub fn with_strides(mut self, strides: (usize, usize)) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub(crate) fn build(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: MaxPoolLayer = parse_params(MAX_POOL_LAYER, params)?;
        Ok(Rc::new(layer))
    }
}

impl Layer for MaxPoolLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_type(&self) -> &'static str {
        MAX_POOL_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        let x = single_input(&self.name, inputs)?;
        Ok(x.max_pool2d(self.ksize, self.strides, self.padding)?)
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::call;
    use crate::nn::InputLayer;
    use crate::tensor::GraphContext;

    #[test]
    fn max_pool_halves_spatial_dims() {
        let ctx = GraphContext::new_ref();
        let x = InputLayer::input(&ctx, vec![2, 9, 9, 4], "input").unwrap();
        let pool = Rc::new(MaxPoolLayer::new("pool"));
        let y = call(pool.clone(), &[&x]).unwrap();
        assert_eq!(y.shape(), &vec![2, 5, 5, 4]);
        assert!(pool.parameters().is_empty());
    }

    #[test]
    fn valid_padding() {
        let ctx = GraphContext::new_ref();
        let x = InputLayer::input(&ctx, vec![2, 9, 9, 4], "input").unwrap();
        let pool = MaxPoolLayer::new("pool").with_ksize((3, 3)).with_strides((3, 3)).with_padding(Padding::Valid);
        let y = call(Rc::new(pool), &[&x]).unwrap();
        assert_eq!(y.shape(), &vec![2, 3, 3, 4]);
    }
}

//! Layers that merge several tensors into one.

use crate::graph::builder::parse_params;
use crate::graph::layer::input_shape;
use crate::graph::{ComputationMode, GraphError, GraphResult, Layer};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const CONCAT_LAYER: &str = "ConcatLayer";
pub const SUM_LAYER: &str = "SumLayer";

fn at_least_two(name: &str, inputs: &[Tensor]) -> GraphResult<()> {
    if inputs.len() < 2 {
        return Err(GraphError::Arity { layer: name.to_string(), expected: "2 or more".to_string(), got: inputs.len() });
    }
    Ok(())
}

/// Concatenates its inputs along `axis` (channels for NHWC by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatLayer {
    pub name: String,
    pub axis: usize,
}

impl ConcatLayer {
    pub fn new(name: &str, axis: usize) -> Self {
        Self { name: name.to_string(), axis }
    }

    pub(crate) fn build(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: ConcatLayer = parse_params(CONCAT_LAYER, params)?;
        Ok(Rc::new(layer))
    }
}

impl Default for ConcatLayer {
    fn default() -> Self {
        Self::new("concat", 3)
    }
}

impl Layer for ConcatLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_type(&self) -> &'static str {
        CONCAT_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        at_least_two(&self.name, inputs)?;
        Ok(Tensor::concat(inputs, self.axis)?)
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Element-wise sum of inputs with identical shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumLayer {
    pub name: String,
}

impl SumLayer {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }

    pub(crate) fn build(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: SumLayer = parse_params(SUM_LAYER, params)?;
        Ok(Rc::new(layer))
    }
}

impl Layer for SumLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_type(&self) -> &'static str {
        SUM_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        at_least_two(&self.name, inputs)?;
        let expected = input_shape(&self.name, &inputs[0])?;
        let mut acc = inputs[0].clone();
        for x in &inputs[1..] {
            let shape = input_shape(&self.name, x)?;
            if shape != expected {
                return Err(GraphError::Shape {
                    layer: self.name.clone(),
                    reason: format!("cannot sum {:?} and {:?}", expected, shape),
                });
            }
            acc = &acc + x;
        }
        Ok(acc)
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
    fn concat_of_two_branches() {
        let ctx = GraphContext::new_ref();
        let a = InputLayer::input(&ctx, vec![2, 4, 4, 3], "a").unwrap();
        let b = InputLayer::input(&ctx, vec![2, 4, 4, 5], "b").unwrap();
        let c = call(Rc::new(ConcatLayer::new("cat", 3)), &[&a, &b]).unwrap();
        assert_eq!(c.shape(), &vec![2, 4, 4, 8]);
        assert_eq!(c.parent_tensor_names(), vec!["a", "b"]);
        assert_eq!(c.previous_tensors().len(), 2);
    }

    #[test]
    fn sum_needs_matching_shapes() {
        let ctx = GraphContext::new_ref();
        let a = InputLayer::input(&ctx, vec![2, 3], "a").unwrap();
        let b = InputLayer::input(&ctx, vec![2, 4], "b").unwrap();
        assert!(matches!(call(Rc::new(SumLayer::new("sum")), &[&a, &b]), Err(GraphError::Shape { .. })));
        assert!(matches!(call(Rc::new(SumLayer::new("sum1")), &[&a]), Err(GraphError::Arity { .. })));
    }
}

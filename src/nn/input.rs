//! Graph entry points.

use crate::asg::{DType, Shape};
use crate::graph::builder::parse_params;
use crate::graph::layer::call;
use crate::graph::{ComputationMode, GraphError, GraphResult, Layer, MakiTensor};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const INPUT_LAYER: &str = "InputLayer";

/// Pipeline element an input is bound to instead of a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorBinding {
    pub source: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputParams {
    pub name: String,
    pub input_shape: Shape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterator: Option<IteratorBinding>,
}

/// Source of data for a model: a placeholder, or an element of a data pipeline.
///
/// The op-graph node is created once at construction, so the inference and
/// training graphs read the same input.
#[derive(Debug)]
pub struct InputLayer {
    params: InputParams,
    tensor: Tensor,
}

impl InputLayer {
    pub fn new(context: &ContextRef, input_shape: Shape, name: &str) -> Self {
        Self::from_params(
            context,
            InputParams { name: name.to_string(), input_shape, iterator: None },
        )
    }

    /// Input fed by the pipeline `source` under `key`; runs need no feed for it.
    pub fn from_iterator(context: &ContextRef, input_shape: Shape, source: &str, key: &str, name: &str) -> Self {
        Self::from_params(
            context,
            InputParams {
                name: name.to_string(),
                input_shape,
                iterator: Some(IteratorBinding { source: source.to_string(), key: key.to_string() }),
            },
        )
    }

    pub fn from_params(context: &ContextRef, params: InputParams) -> Self {
        let tensor = match &params.iterator {
            Some(binding) => Tensor::iterator_get_next(
                context,
                &binding.source,
                &binding.key,
                params.input_shape.clone(),
                DType::F32,
            ),
            None => Tensor::new_input(context, &params.name, params.input_shape.clone(), DType::F32),
        };
        Self { params, tensor }
    }

    /// Shorthand for creating the layer and calling it.
    pub fn input(context: &ContextRef, input_shape: Shape, name: &str) -> GraphResult<MakiTensor> {
        call(Rc::new(Self::new(context, input_shape, name)), &[])
    }

    pub fn is_placeholder(&self) -> bool {
        self.params.iterator.is_none()
    }

    pub(crate) fn build(context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let params: InputParams = parse_params(INPUT_LAYER, params)?;
        Ok(Rc::new(Self::from_params(context, params)))
    }
}

impl Layer for InputLayer {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn layer_type(&self) -> &'static str {
        INPUT_LAYER
    }

    fn forward(&self, inputs: &[Tensor], _mode: ComputationMode) -> GraphResult<Tensor> {
        if !inputs.is_empty() {
            return Err(GraphError::Arity {
                layer: self.params.name.clone(),
                expected: "0".to_string(),
                got: inputs.len(),
            });
        }
        Ok(self.tensor.clone())
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(&self.params)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::NodeType;
    use crate::tensor::GraphContext;

    #[test]
    fn input_tensor_is_named_after_the_layer() {
        let ctx = GraphContext::new_ref();
        let x = InputLayer::input(&ctx, vec![16, 784], "input").unwrap();
        assert_eq!(x.name(), "input");
        assert_eq!(x.shape(), &vec![16, 784]);
        assert!(x.previous_tensors().is_empty());
        assert_eq!(ctx.borrow().graph().inputs, vec![x.data().node_id]);
    }

    #[test]
    fn iterator_input_reads_from_the_pipeline() {
        let ctx = GraphContext::new_ref();
        let layer = InputLayer::from_iterator(&ctx, vec![4, 8, 8, 2], "train", "uv_map", "uv");
        assert!(!layer.is_placeholder());
        let t = layer.forward(&[], ComputationMode::Training).unwrap();
        let ctx = ctx.borrow();
        match &ctx.graph().get_node(t.node_id).unwrap().node_type {
            NodeType::IteratorGetNext { source, key } => {
                assert_eq!(source, "train");
                assert_eq!(key, "uv_map");
            }
            other => panic!("unexpected node {:?}", other),
        }
    }
}

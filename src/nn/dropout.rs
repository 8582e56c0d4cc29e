//! Dropout for regularization.

use crate::graph::builder::parse_params;
use crate::graph::layer::single_input;
use crate::graph::{ComputationMode, GraphError, GraphResult, Layer};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const DROPOUT_LAYER: &str = "DropoutLayer";

/// Keeps each element with probability `p_keep` while training, scaling the
/// survivors by `1 / p_keep`. The inference graph passes the input through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutLayer {
    pub name: String,
    pub p_keep: f32,
}

impl DropoutLayer {
    pub fn new(name: &str, p_keep: f32) -> GraphResult<Self> {
        if !(p_keep > 0.0 && p_keep <= 1.0) {
            return Err(GraphError::Shape {
                layer: name.to_string(),
                reason: format!("keep probability must be in (0, 1], got {}", p_keep),
            });
        }
        Ok(Self { name: name.to_string(), p_keep })
    }

    pub(crate) fn build(_context: &ContextRef, params: &serde_json::Value) -> GraphResult<Rc<dyn Layer>> {
        let layer: DropoutLayer = parse_params(DROPOUT_LAYER, params)?;
        Ok(Rc::new(Self::new(&layer.name, layer.p_keep)?))
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_type(&self) -> &'static str {
        DROPOUT_LAYER
    }

    fn forward(&self, inputs: &[Tensor], mode: ComputationMode) -> GraphResult<Tensor> {
        let x = single_input(&self.name, inputs)?;
        Ok(match mode {
            ComputationMode::Inference => x.clone(),
            ComputationMode::Training => x.dropout(self.p_keep),
        })
    }

    fn params(&self) -> GraphResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::{DType, NodeType};
    use crate::tensor::GraphContext;

    #[test]
    fn dropout_only_in_training_graph() {
        let ctx = GraphContext::new_ref();
        let x = Tensor::new_input(&ctx, "x", vec![4, 10], DType::F32);
        let dropout = DropoutLayer::new("drop", 0.5).unwrap();

        let inference = dropout.forward(&[x.clone()], ComputationMode::Inference).unwrap();
        assert_eq!(inference, x);

        let training = dropout.forward(&[x.clone()], ComputationMode::Training).unwrap();
        let ctx = ctx.borrow();
        let node = ctx.graph().get_node(training.node_id).unwrap();
        assert_eq!(node.node_type, NodeType::Dropout { input: x.node_id, keep_prob: 0.5 });
        assert_eq!(node.shape, Some(vec![4, 10]));
    }

    #[test]
    fn rejects_bad_probability() {
        assert!(DropoutLayer::new("drop", 0.0).is_err());
        assert!(DropoutLayer::new("drop", 1.5).is_err());
    }
}

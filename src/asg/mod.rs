//! ASG: the symbolic op graph handed to the executor.
//!
//! Nodes are plain data. Nothing in this crate evaluates them; an
//! [`Executor`](crate::runtime::Executor) receives the graph together with
//! the fetches and feeds and does the numeric work.

use crate::optimizers::UpdateRule;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Node identifier.
pub type NodeId = usize;
/// Static tensor shape, batch dimension first.
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("node {0} does not exist in the graph")]
    NodeNotFound(NodeId),
    #[error("node {0} has no static shape")]
    MissingShape(NodeId),
    #[error("incompatible shapes for {op}: {detail}")]
    IncompatibleShapes { op: &'static str, detail: String },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    I32,
}

/// Element-wise activation applied by a layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

/// Spatial padding scheme for convolutions and pooling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Padding {
    #[default]
    Same,
    Valid,
}

impl Padding {
    /// Output extent along one spatial axis.
    pub fn output_dim(self, input: usize, kernel: usize, stride: usize) -> Option<usize> {
        if stride == 0 {
            return None;
        }
        match self {
            Padding::Same => Some((input + stride - 1) / stride),
            Padding::Valid => input.checked_sub(kernel).map(|d| d / stride + 1),
        }
    }
}

/// How the executor fills a variable on initialization.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitType {
    #[default]
    He,
    XavierGaussian,
    XavierUniform,
    Zeros,
    Constant(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
    pub dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Data
    Input { name: String },
    Variable { name: String, init: InitType },
    Literal(Value),
    /// Next element of a data pipeline, addressed by source and key.
    IteratorGetNext { source: String, key: String },

    // Binary, with broadcasting
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),

    // Unary
    Abs(NodeId),
    Square(NodeId),
    Activation(NodeId, Activation),
    Dropout { input: NodeId, keep_prob: f32 },

    // Reductions over every axis
    Sum(NodeId),
    Mean(NodeId),

    // Spatial
    Conv2d { input: NodeId, kernel: NodeId, stride: (usize, usize), padding: Padding },
    MaxPool2d { input: NodeId, ksize: (usize, usize), stride: (usize, usize), padding: Padding },
    /// Bilinear lookup of `texture` at the UV coordinates in the last axis of `coords`.
    GridSample { texture: NodeId, coords: NodeId },

    // Transformations
    Reshape(NodeId, Shape),
    Concat { inputs: Vec<NodeId>, axis: usize },
    SliceLastAxis { input: NodeId, start: usize, end: usize },

    // Derived tensor operations
    ShapeOf(NodeId),
    Index { input: NodeId, key: usize },

    // Training
    SparseSoftmaxCrossEntropy { logits: NodeId, labels: NodeId },
    ApplyUpdates {
        rule: UpdateRule,
        loss: NodeId,
        variables: Vec<NodeId>,
        slots: Vec<NodeId>,
        global_step: Option<NodeId>,
    },
}

impl NodeType {
    /// Direct operands of this node, in declaration order.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. }
            | NodeType::Variable { .. }
            | NodeType::Literal(_)
            | NodeType::IteratorGetNext { .. } => vec![],
            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::Divide(a, b)
            | NodeType::MatrixMultiply(a, b) => vec![*a, *b],
            NodeType::Abs(a)
            | NodeType::Square(a)
            | NodeType::Activation(a, _)
            | NodeType::Sum(a)
            | NodeType::Mean(a)
            | NodeType::Reshape(a, _)
            | NodeType::ShapeOf(a) => vec![*a],
            NodeType::Dropout { input, .. }
            | NodeType::MaxPool2d { input, .. }
            | NodeType::SliceLastAxis { input, .. }
            | NodeType::Index { input, .. } => vec![*input],
            NodeType::Conv2d { input, kernel, .. } => vec![*input, *kernel],
            NodeType::GridSample { texture, coords } => vec![*texture, *coords],
            NodeType::Concat { inputs, .. } => inputs.clone(),
            NodeType::SparseSoftmaxCrossEntropy { logits, labels } => vec![*logits, *labels],
            NodeType::ApplyUpdates { loss, variables, slots, global_step, .. } => {
                let mut ids = vec![*loss];
                ids.extend(variables);
                ids.extend(slots);
                ids.extend(global_step);
                ids
            }
        }
    }
}

/// Host-side value exchanged with the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    IntTensor(ArrayD<i32>),
    ScalarF32(f32),
    ScalarI32(i32),
}

impl Value {
    /// Reads a scalar out of a scalar value or a single-element tensor.
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Value::ScalarF32(v) => Some(*v),
            Value::ScalarI32(v) => Some(*v as f32),
            Value::Tensor(t) if t.len() == 1 => t.iter().next().copied(),
            Value::IntTensor(t) if t.len() == 1 => t.iter().next().map(|v| *v as f32),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_tensor(self) -> Option<ArrayD<f32>> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Value::Tensor(t) => t.shape().to_vec(),
            Value::IntTensor(t) => t.shape().to_vec(),
            Value::ScalarF32(_) | Value::ScalarI32(_) => vec![],
        }
    }
}

/// Numpy-style broadcast of two static shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub variables: Vec<NodeId>,
}

impl Asg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: Option<String>,
        node_type: NodeType,
        shape: Option<Shape>,
        dtype: DType,
    ) -> NodeId {
        let id = self.nodes.len();
        match &node_type {
            NodeType::Input { .. } => self.inputs.push(id),
            NodeType::Variable { .. } => self.variables.push(id),
            _ => {}
        }
        self.nodes.insert(id, Node { id, name, node_type, shape, dtype });
        id
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn shape_of(&self, id: NodeId) -> AsgResult<&Shape> {
        self.get_node(id)?.shape.as_ref().ok_or(AsgError::MissingShape(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_follows_trailing_axes() {
        assert_eq!(broadcast_shapes(&[16, 10], &[10]), Some(vec![16, 10]));
        assert_eq!(broadcast_shapes(&[4, 1, 3], &[5, 3]), Some(vec![4, 5, 3]));
        assert_eq!(broadcast_shapes(&[], &[2, 2]), Some(vec![2, 2]));
        assert_eq!(broadcast_shapes(&[3], &[4]), None);
    }

    #[test]
    fn padding_output_dims() {
        assert_eq!(Padding::Same.output_dim(7, 3, 2), Some(4));
        assert_eq!(Padding::Valid.output_dim(7, 3, 2), Some(3));
        assert_eq!(Padding::Valid.output_dim(2, 3, 1), None);
    }

    #[test]
    fn add_node_registers_inputs_and_variables() {
        let mut g = Asg::new();
        let x = g.add_node(None, NodeType::Input { name: "x".into() }, Some(vec![2]), DType::F32);
        let w = g.add_node(
            None,
            NodeType::Variable { name: "w".into(), init: InitType::Zeros },
            Some(vec![2]),
            DType::F32,
        );
        g.add_node(None, NodeType::Add(x, w), Some(vec![2]), DType::F32);
        assert_eq!(g.inputs, vec![x]);
        assert_eq!(g.variables, vec![w]);
        assert_eq!(g.get_node(2).unwrap().node_type.operands(), vec![x, w]);
        assert_eq!(g.get_node(9), Err(AsgError::NodeNotFound(9)));
    }
}

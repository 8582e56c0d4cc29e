//! `Tensor` and `GraphContext`.
//!
//! A `Tensor` here is not a data container. It is a lightweight handle to a
//! node of the op graph ([`Asg`]) owned by a shared `GraphContext`. Every
//! operation on a handle appends a node and returns a new handle; the
//! numbers are produced later by an executor.

use crate::asg::{
    broadcast_shapes, Activation, Asg, AsgError, AsgResult, DType, InitType, NodeId, NodeType,
    Padding, Shape, Value,
};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;

/// Shared handle to a graph context.
pub type ContextRef = Rc<RefCell<GraphContext>>;

/// Owns the op graph being built and the bookkeeping that layers need
/// while they append to it.
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    graph: Asg,
    // How many times each layer name has been called; drives tensor naming.
    layer_calls: HashMap<String, usize>,
    global_step: Option<NodeId>,
}

impl GraphContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh context already wrapped for sharing.
    pub fn new_ref() -> ContextRef {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn graph(&self) -> &Asg {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Asg {
        &mut self.graph
    }

    /// Returns how many times `layer_name` was called before and bumps the counter.
    pub fn next_call_index(&mut self, layer_name: &str) -> usize {
        let counter = self.layer_calls.entry(layer_name.to_string()).or_insert(0);
        let index = *counter;
        *counter += 1;
        index
    }
}

/// Symbolic handle to a node in the op graph.
#[derive(Clone)]
pub struct Tensor {
    pub node_id: NodeId,
    pub context: ContextRef,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor").field("node_id", &self.node_id).finish()
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && Rc::ptr_eq(&self.context, &other.context)
    }
}

impl Tensor {
    pub(crate) fn from_context(
        context: &ContextRef,
        name: Option<String>,
        node_type: NodeType,
        shape: Option<Shape>,
        dtype: DType,
    ) -> Self {
        let node_id = context.borrow_mut().graph_mut().add_node(name, node_type, shape, dtype);
        Self { node_id, context: Rc::clone(context) }
    }

    fn push(&self, node_type: NodeType, shape: Option<Shape>) -> Self {
        Self::from_context(&self.context, None, node_type, shape, DType::F32)
    }

    /// Placeholder fed with real data at run time.
    pub fn new_input(context: &ContextRef, name: &str, shape: Shape, dtype: DType) -> Self {
        Self::from_context(
            context,
            Some(name.to_string()),
            NodeType::Input { name: name.to_string() },
            Some(shape),
            dtype,
        )
    }

    /// Trainable (or frozen) variable; the executor fills it on initialization.
    pub fn new_variable(context: &ContextRef, name: &str, shape: Shape, init: InitType) -> Self {
        Self::from_context(
            context,
            Some(name.to_string()),
            NodeType::Variable { name: name.to_string(), init },
            Some(shape),
            DType::F32,
        )
    }

    pub fn new_literal(context: &ContextRef, data: ArrayD<f32>, name: &str) -> Self {
        let shape = data.shape().to_vec();
        Self::from_context(
            context,
            Some(name.to_string()),
            NodeType::Literal(Value::Tensor(data)),
            Some(shape),
            DType::F32,
        )
    }

    pub fn scalar(context: &ContextRef, value: f32) -> Self {
        Self::from_context(context, None, NodeType::Literal(Value::ScalarF32(value)), Some(vec![]), DType::F32)
    }

    /// Next element `key` of the pipeline `source`.
    pub fn iterator_get_next(
        context: &ContextRef,
        source: &str,
        key: &str,
        shape: Shape,
        dtype: DType,
    ) -> Self {
        Self::from_context(
            context,
            Some(format!("{}/{}", source, key)),
            NodeType::IteratorGetNext { source: source.to_string(), key: key.to_string() },
            Some(shape),
            dtype,
        )
    }

    /// The context-wide step counter, created on first use.
    pub fn global_step(context: &ContextRef) -> Self {
        let existing = context.borrow().global_step;
        if let Some(node_id) = existing {
            return Self { node_id, context: Rc::clone(context) };
        }
        let step = Self::from_context(
            context,
            Some("global_step".to_string()),
            NodeType::Variable { name: "global_step".to_string(), init: InitType::Zeros },
            Some(vec![]),
            DType::I32,
        );
        context.borrow_mut().global_step = Some(step.node_id);
        step
    }

    pub fn shape(&self) -> Option<Shape> {
        self.context
            .borrow()
            .graph()
            .get_node(self.node_id)
            .ok()
            .and_then(|n| n.shape.clone())
    }

    fn require_shape(&self) -> AsgResult<Shape> {
        self.shape().ok_or(AsgError::MissingShape(self.node_id))
    }

    // --- Linear algebra and spatial ops ---

    /// `[.., n, k] x [k, m]`.
    pub fn dot(&self, other: &Tensor) -> AsgResult<Self> {
        let a = self.require_shape()?;
        let b = other.require_shape()?;
        if a.is_empty() || b.len() != 2 || a[a.len() - 1] != b[0] {
            return Err(incompatible("matmul", &a, &b));
        }
        let mut shape = a.clone();
        let last = shape.len() - 1;
        shape[last] = b[1];
        Ok(self.push(NodeType::MatrixMultiply(self.node_id, other.node_id), Some(shape)))
    }

    /// NHWC input, `[kh, kw, in, out]` kernel.
    pub fn conv2d(&self, kernel: &Tensor, stride: (usize, usize), padding: Padding) -> AsgResult<Self> {
        let x = self.require_shape()?;
        let k = kernel.require_shape()?;
        if x.len() != 4 || k.len() != 4 || x[3] != k[2] {
            return Err(incompatible("conv2d", &x, &k));
        }
        let h = padding.output_dim(x[1], k[0], stride.0);
        let w = padding.output_dim(x[2], k[1], stride.1);
        let (h, w) = h.zip(w).ok_or_else(|| incompatible("conv2d", &x, &k))?;
        Ok(self.push(
            NodeType::Conv2d { input: self.node_id, kernel: kernel.node_id, stride, padding },
            Some(vec![x[0], h, w, k[3]]),
        ))
    }

    pub fn max_pool2d(&self, ksize: (usize, usize), stride: (usize, usize), padding: Padding) -> AsgResult<Self> {
        let x = self.require_shape()?;
        if x.len() != 4 {
            return Err(incompatible("max_pool2d", &x, &[ksize.0, ksize.1]));
        }
        let h = padding.output_dim(x[1], ksize.0, stride.0);
        let w = padding.output_dim(x[2], ksize.1, stride.1);
        let (h, w) = h.zip(w).ok_or_else(|| incompatible("max_pool2d", &x, &[ksize.0, ksize.1]))?;
        Ok(self.push(
            NodeType::MaxPool2d { input: self.node_id, ksize, stride, padding },
            Some(vec![x[0], h, w, x[3]]),
        ))
    }

    /// Samples `[th, tw, c]` texture at `[.., 2]` UV coordinates.
    pub fn grid_sample(texture: &Tensor, coords: &Tensor) -> AsgResult<Self> {
        let t = texture.require_shape()?;
        let c = coords.require_shape()?;
        if t.len() != 3 || c.last() != Some(&2) {
            return Err(incompatible("grid_sample", &t, &c));
        }
        let mut shape = c.clone();
        let last = shape.len() - 1;
        shape[last] = t[2];
        Ok(texture.push(
            NodeType::GridSample { texture: texture.node_id, coords: coords.node_id },
            Some(shape),
        ))
    }

    pub fn concat(tensors: &[Tensor], axis: usize) -> AsgResult<Self> {
        let first = tensors.first().ok_or(AsgError::IncompatibleShapes {
            op: "concat",
            detail: "no tensors to concatenate".to_string(),
        })?;
        let mut shape = first.require_shape()?;
        if axis >= shape.len() {
            return Err(incompatible("concat", &shape, &[axis]));
        }
        for t in &tensors[1..] {
            let s = t.require_shape()?;
            let same_rest = s.len() == shape.len()
                && s.iter().zip(&shape).enumerate().all(|(i, (a, b))| i == axis || a == b);
            if !same_rest {
                return Err(incompatible("concat", &shape, &s));
            }
            shape[axis] += s[axis];
        }
        Ok(first.push(
            NodeType::Concat { inputs: tensors.iter().map(|t| t.node_id).collect(), axis },
            Some(shape),
        ))
    }

    pub fn reshape(&self, shape: Shape) -> AsgResult<Self> {
        let from = self.require_shape()?;
        if from.iter().product::<usize>() != shape.iter().product::<usize>() {
            return Err(incompatible("reshape", &from, &shape));
        }
        Ok(self.push(NodeType::Reshape(self.node_id, shape.clone()), Some(shape)))
    }

    /// `x[..., start..end]`.
    pub fn slice_last_axis(&self, start: usize, end: usize) -> AsgResult<Self> {
        let mut shape = self.require_shape()?;
        match shape.last_mut() {
            Some(last) if start < end && end <= *last => *last = end - start,
            _ => return Err(incompatible("slice", &shape, &[start, end])),
        }
        Ok(self.push(NodeType::SliceLastAxis { input: self.node_id, start, end }, Some(shape)))
    }

    // --- Derived tensor operations ---

    pub fn shape_of(&self) -> AsgResult<Self> {
        let rank = self.require_shape()?.len();
        Ok(Self::from_context(
            &self.context,
            None,
            NodeType::ShapeOf(self.node_id),
            Some(vec![rank]),
            DType::I32,
        ))
    }

    /// `x[key]` along the first axis.
    pub fn index(&self, key: usize) -> AsgResult<Self> {
        let shape = self.require_shape()?;
        match shape.first() {
            Some(&len) if key < len => {}
            _ => return Err(incompatible("index", &shape, &[key])),
        }
        let dtype = self.context.borrow().graph().get_node(self.node_id)?.dtype;
        Ok(Self::from_context(
            &self.context,
            None,
            NodeType::Index { input: self.node_id, key },
            Some(shape[1..].to_vec()),
            dtype,
        ))
    }

    // --- Element-wise ---

    pub fn activation(&self, activation: Activation) -> Self {
        self.push(NodeType::Activation(self.node_id, activation), self.shape())
    }

    pub fn dropout(&self, keep_prob: f32) -> Self {
        self.push(NodeType::Dropout { input: self.node_id, keep_prob }, self.shape())
    }

    pub fn abs(&self) -> Self {
        self.push(NodeType::Abs(self.node_id), self.shape())
    }

    pub fn square(&self) -> Self {
        self.push(NodeType::Square(self.node_id), self.shape())
    }

    // --- Reductions ---

    pub fn sum(&self) -> Self {
        self.push(NodeType::Sum(self.node_id), Some(vec![]))
    }

    pub fn mean(&self) -> Self {
        self.push(NodeType::Mean(self.node_id), Some(vec![]))
    }

    /// Mean softmax cross-entropy of `logits` against integer class labels.
    pub fn sparse_softmax_cross_entropy(logits: &Tensor, labels: &Tensor) -> AsgResult<Self> {
        let l = logits.require_shape()?;
        let y = labels.require_shape()?;
        if l.len() != 2 || y.len() != 1 || l[0] != y[0] {
            return Err(incompatible("sparse_softmax_cross_entropy", &l, &y));
        }
        Ok(logits.push(
            NodeType::SparseSoftmaxCrossEntropy { logits: logits.node_id, labels: labels.node_id },
            Some(vec![]),
        ))
    }

    fn binary(&self, rhs: &Tensor, make: fn(NodeId, NodeId) -> NodeType) -> Tensor {
        let shape = match (self.shape(), rhs.shape()) {
            (Some(a), Some(b)) => broadcast_shapes(&a, &b),
            _ => None,
        };
        self.push(make(self.node_id, rhs.node_id), shape)
    }
}

fn incompatible(op: &'static str, a: &[usize], b: &[usize]) -> AsgError {
    AsgError::IncompatibleShapes { op, detail: format!("{:?} vs {:?}", a, b) }
}

// Operator sugar for `&a + &b`. Shapes broadcast; an impossible broadcast
// leaves the result shape unknown and is reported by the consumer.

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Tensor {
        self.binary(rhs, NodeType::Add)
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Tensor {
        self.binary(rhs, NodeType::Subtract)
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Tensor {
        self.binary(rhs, NodeType::Multiply)
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Tensor {
        self.binary(rhs, NodeType::Divide)
    }
}

//! The `Layer` contract and the call that threads tensor wrappers through it.

use crate::asg::{InitType, Shape};
use crate::graph::{GraphError, GraphResult, LayerRecord, MakiTensor};
use crate::tensor::{ContextRef, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Which graph a forward pass builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationMode {
    Inference,
    Training,
}

/// Role of a parameter; only weights are regularized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Weight,
    Bias,
    Texture,
}

/// A named variable owned by a layer.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub tensor: Tensor,
    pub shape: Shape,
    pub kind: ParamKind,
}

impl Parameter {
    /// Registers a new variable in the graph.
    pub fn new(context: &ContextRef, name: String, shape: Shape, init: InitType, kind: ParamKind) -> Self {
        let tensor = Tensor::new_variable(context, &name, shape.clone(), init);
        Self { name, tensor, shape, kind }
    }
}

/// A named, composable unit with parameters and a forward computation.
///
/// `forward` works on raw op-graph tensors and is called once per graph
/// (inference and training); [`call`] wraps the inference result into a
/// [`MakiTensor`].
pub trait Layer: fmt::Debug {
    fn name(&self) -> &str;

    /// Tag used in the serialized description.
    fn layer_type(&self) -> &'static str;

    fn forward(&self, inputs: &[Tensor], mode: ComputationMode) -> GraphResult<Tensor>;

    /// Owned parameters, children's included for composite layers.
    fn parameters(&self) -> Vec<Parameter> {
        Vec::new()
    }

    /// Constructor parameters as plain data.
    fn params(&self) -> GraphResult<serde_json::Value>;

    fn to_record(&self) -> GraphResult<LayerRecord> {
        Ok(LayerRecord { layer_type: self.layer_type().to_string(), params: self.params()? })
    }
}

/// Pointer identity for layer handles.
pub fn same_layer(a: &Rc<dyn Layer>, b: &Rc<dyn Layer>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// Checks the number of inputs and returns the single one.
pub fn single_input<'a>(name: &str, inputs: &'a [Tensor]) -> GraphResult<&'a Tensor> {
    match inputs {
        [x] => Ok(x),
        _ => Err(GraphError::Arity { layer: name.to_string(), expected: "1".to_string(), got: inputs.len() }),
    }
}

/// Input shape or a layer-scoped shape error.
pub(crate) fn input_shape(name: &str, x: &Tensor) -> GraphResult<Shape> {
    x.shape().ok_or_else(|| GraphError::Shape {
        layer: name.to_string(),
        reason: "input shape is unknown".to_string(),
    })
}

/// Calls `layer` on `inputs` in inference mode.
///
/// The result is named after the layer on its first call and `"{layer}_{k}"`
/// on the k-th reuse, so shared layers give distinct tensors.
pub fn call(layer: Rc<dyn Layer>, inputs: &[&MakiTensor]) -> GraphResult<MakiTensor> {
    call_named(layer, inputs, None)
}

pub(crate) fn call_named(
    layer: Rc<dyn Layer>,
    inputs: &[&MakiTensor],
    name: Option<String>,
) -> GraphResult<MakiTensor> {
    let raw: Vec<Tensor> = inputs.iter().map(|t| t.data().clone()).collect();
    let data = layer.forward(&raw, ComputationMode::Inference)?;
    let index = data.context.borrow_mut().next_call_index(layer.name());
    let name = name.unwrap_or_else(|| match index {
        0 => layer.name().to_string(),
        k => format!("{}_{}", layer.name(), k),
    });
    let shape = data.shape().ok_or_else(|| GraphError::Shape {
        layer: layer.name().to_string(),
        reason: "output shape is unknown".to_string(),
    })?;
    let parents = inputs.iter().map(|t| (*t).clone()).collect();
    Ok(MakiTensor::new(name, data, shape, layer, parents))
}

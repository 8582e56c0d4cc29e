//! `MakiTensor`: a raw op-graph tensor plus its place in the layer graph.

use crate::asg::Shape;
use crate::graph::layer::Layer;
use crate::tensor::Tensor;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

struct Inner {
    name: String,
    data: Tensor,
    shape: Shape,
    producer: Rc<dyn Layer>,
    parents: Vec<MakiTensor>,
    previous_tensors: BTreeMap<String, MakiTensor>,
}

/// Tensor wrapper produced by calling a layer.
///
/// Cloning is cheap; clones share identity (see [`MakiTensor::ptr_eq`]).
#[derive(Clone)]
pub struct MakiTensor(Rc<Inner>);

impl MakiTensor {
    /// Wraps `data` produced by `producer` from `parents`.
    ///
    /// `previous_tensors` becomes the union of the parents' ancestors and the
    /// parents themselves. On a name clash the first tensor seen is kept;
    /// [`collect`](crate::graph::collect) walks `parents` and reports the clash.
    pub fn new(
        name: String,
        data: Tensor,
        shape: Shape,
        producer: Rc<dyn Layer>,
        parents: Vec<MakiTensor>,
    ) -> Self {
        let mut previous_tensors = BTreeMap::new();
        for parent in &parents {
            for (n, t) in parent.previous_tensors() {
                previous_tensors.entry(n.clone()).or_insert_with(|| t.clone());
            }
            previous_tensors
                .entry(parent.name().to_string())
                .or_insert_with(|| parent.clone());
        }
        Self(Rc::new(Inner { name, data, shape, producer, parents, previous_tensors }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Raw op-graph handle.
    pub fn data(&self) -> &Tensor {
        &self.0.data
    }

    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    pub fn producer(&self) -> &Rc<dyn Layer> {
        &self.0.producer
    }

    /// Direct inputs of the producing call, in call order.
    pub fn parents(&self) -> &[MakiTensor] {
        &self.0.parents
    }

    pub fn parent_tensor_names(&self) -> Vec<String> {
        self.0.parents.iter().map(|p| p.name().to_string()).collect()
    }

    /// Every ancestor, keyed by name. Does not contain `self`.
    pub fn previous_tensors(&self) -> &BTreeMap<String, MakiTensor> {
        &self.0.previous_tensors
    }

    /// `previous_tensors` plus this tensor.
    pub fn graph_tensors(&self) -> BTreeMap<String, MakiTensor> {
        let mut tensors = self.0.previous_tensors.clone();
        tensors.insert(self.name().to_string(), self.clone());
        tensors
    }

    pub fn ptr_eq(a: &MakiTensor, b: &MakiTensor) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for MakiTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MakiTensor")
            .field("name", &self.0.name)
            .field("shape", &self.0.shape)
            .field("producer", &self.0.producer.name())
            .field("parents", &self.parent_tensor_names())
            .finish()
    }
}

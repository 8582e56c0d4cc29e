//! Graph builder/restorer.
//!
//! `collect` gathers every tensor and layer reachable from a set of outputs,
//! `serialize` flattens them into dependency-ordered records and `restore`
//! replays such records through a [`LayerRegistry`].

use crate::graph::layer::{call_named, same_layer, Layer};
use crate::graph::{GraphError, GraphResult, MakiTensor};
use crate::tensor::ContextRef;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

/// `{type, params}` of the layer that produced a tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    #[serde(rename = "type")]
    pub layer_type: String,
    pub params: serde_json::Value,
}

/// One tensor of the graph description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub name: String,
    pub parent_tensor_names: Vec<String>,
    pub parent_layer_info: LayerRecord,
}

/// Model-level entry of the description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub input_mt: String,
    pub output_mt: String,
    pub name: String,
    /// Model-specific names (e.g. the renderer's sampled texture).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The whole JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    #[serde(rename = "MODEL_INFO")]
    pub model_info: ModelInfo,
    #[serde(rename = "GRAPH_INFO")]
    pub graph_info: Vec<TensorRecord>,
}

/// Everything reachable from a set of outputs.
#[derive(Debug, Clone, Default)]
pub struct CollectedGraph {
    pub tensors: BTreeMap<String, MakiTensor>,
    pub layers: BTreeMap<String, Rc<dyn Layer>>,
}

/// Walks the producer chain of `outputs`.
///
/// Fails with [`GraphError::DuplicateName`] when two distinct tensors or two
/// distinct layers share a name, and when two parameters of the collected
/// layers share a name. A layer reached through several tensors (weight
/// sharing) is recorded once.
pub fn collect(outputs: &[MakiTensor]) -> GraphResult<CollectedGraph> {
    let mut graph = CollectedGraph::default();
    let mut stack: Vec<MakiTensor> = outputs.to_vec();

    while let Some(tensor) = stack.pop() {
        if let Some(seen) = graph.tensors.get(tensor.name()) {
            if MakiTensor::ptr_eq(seen, &tensor) {
                continue;
            }
            return Err(GraphError::DuplicateName { kind: "tensor", name: tensor.name().to_string() });
        }

        let layer = tensor.producer();
        match graph.layers.get(layer.name()) {
            Some(seen) if !same_layer(seen, layer) => {
                return Err(GraphError::DuplicateName { kind: "layer", name: layer.name().to_string() });
            }
            Some(_) => {}
            None => {
                graph.layers.insert(layer.name().to_string(), Rc::clone(layer));
            }
        }

        stack.extend(tensor.parents().iter().cloned());
        graph.tensors.insert(tensor.name().to_string(), tensor);
    }

    let mut params = HashSet::new();
    for layer in graph.layers.values() {
        for param in layer.parameters() {
            if !params.insert(param.name.clone()) {
                return Err(GraphError::DuplicateName { kind: "parameter", name: param.name });
            }
        }
    }
    Ok(graph)
}

/// Tensors of `graph` with producers before consumers.
pub fn dependency_order(graph: &CollectedGraph) -> GraphResult<Vec<MakiTensor>> {
    let mut dag: DiGraph<&MakiTensor, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for (name, tensor) in &graph.tensors {
        index.insert(name.as_str(), dag.add_node(tensor));
    }
    for (name, tensor) in &graph.tensors {
        for parent in tensor.parents() {
            let from = *index
                .get(parent.name())
                .ok_or_else(|| GraphError::UnknownTensor(parent.name().to_string()))?;
            dag.add_edge(from, index[name.as_str()], ());
        }
    }
    let order = toposort(&dag, None)
        .map_err(|cycle| GraphError::Cycle(dag[cycle.node_id()].name().to_string()))?;
    Ok(order.into_iter().map(|ix| dag[ix].clone()).collect())
}

/// Flattens `graph` into dependency-ordered records.
pub fn serialize(graph: &CollectedGraph) -> GraphResult<Vec<TensorRecord>> {
    dependency_order(graph)?
        .into_iter()
        .map(|tensor| {
            Ok(TensorRecord {
                name: tensor.name().to_string(),
                parent_tensor_names: tensor.parent_tensor_names(),
                parent_layer_info: tensor.producer().to_record()?,
            })
        })
        .collect()
}

/// Rebuilds tensors from `records` in order.
///
/// A record naming a layer that an earlier record already built reuses that
/// layer, so shared weights stay shared. The two records must carry the same
/// `{type, params}`, otherwise [`GraphError::DuplicateName`] is returned.
pub fn restore(
    context: &ContextRef,
    records: &[TensorRecord],
    registry: &LayerRegistry,
) -> GraphResult<BTreeMap<String, MakiTensor>> {
    let mut tensors: BTreeMap<String, MakiTensor> = BTreeMap::new();
    let mut layers: HashMap<String, (Rc<dyn Layer>, &LayerRecord)> = HashMap::new();

    for record in records {
        if tensors.contains_key(&record.name) {
            return Err(GraphError::DuplicateName { kind: "tensor", name: record.name.clone() });
        }
        let parents = record
            .parent_tensor_names
            .iter()
            .map(|name| {
                tensors.get(name).cloned().ok_or_else(|| GraphError::UnknownReference {
                    record: record.name.clone(),
                    name: name.clone(),
                })
            })
            .collect::<GraphResult<Vec<_>>>()?;

        let info = &record.parent_layer_info;
        let shared = info.params.get("name").and_then(|n| n.as_str()).and_then(|n| layers.get(n));
        let layer = match shared {
            Some((layer, first)) if *first == info => Rc::clone(layer),
            Some((layer, _)) => {
                return Err(GraphError::DuplicateName { kind: "layer", name: layer.name().to_string() });
            }
            None => {
                let layer = registry.build(context, info)?;
                if let Some((seen, _)) = layers.get(layer.name()) {
                    return Err(GraphError::DuplicateName { kind: "layer", name: seen.name().to_string() });
                }
                layers.insert(layer.name().to_string(), (Rc::clone(&layer), info));
                layer
            }
        };

        let parent_refs: Vec<&MakiTensor> = parents.iter().collect();
        let tensor = call_named(layer, &parent_refs, Some(record.name.clone()))?;
        tensors.insert(record.name.clone(), tensor);
    }
    Ok(tensors)
}

/// Builds a layer from its serialized params.
pub type LayerBuilder = fn(&ContextRef, &serde_json::Value) -> GraphResult<Rc<dyn Layer>>;

/// Maps type tags to layer builders.
pub struct LayerRegistry {
    builders: HashMap<String, LayerBuilder>,
}

impl LayerRegistry {
    /// A registry without any layer types.
    pub fn empty() -> Self {
        Self { builders: HashMap::new() }
    }

    pub fn register(&mut self, layer_type: &str, builder: LayerBuilder) {
        self.builders.insert(layer_type.to_string(), builder);
    }

    pub fn contains(&self, layer_type: &str) -> bool {
        self.builders.contains_key(layer_type)
    }

    pub fn build(&self, context: &ContextRef, record: &LayerRecord) -> GraphResult<Rc<dyn Layer>> {
        let builder = self
            .builders
            .get(&record.layer_type)
            .ok_or_else(|| GraphError::UnknownLayerType(record.layer_type.clone()))?;
        builder(context, &record.params)
    }
}

impl Default for LayerRegistry {
    /// Every built-in layer.
    fn default() -> Self {
        let mut registry = Self::empty();
        crate::nn::register_builtin(&mut registry);
        registry
    }
}

/// Deserializes layer params, tagging failures with the layer type.
pub fn parse_params<T: DeserializeOwned>(layer_type: &str, params: &serde_json::Value) -> GraphResult<T> {
    serde_json::from_value(params.clone())
        .map_err(|source| GraphError::InvalidParams { layer_type: layer_type.to_string(), source })
}

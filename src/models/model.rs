//! Shared model core: session binding, training preparation, loss building
//! and checkpoint plumbing.

use crate::asg::{NodeId, Value};
use crate::graph::builder::dependency_order;
use crate::graph::{
    collect, restore, serialize, CollectedGraph, ComputationMode, GraphError, Layer, LayerRegistry,
    MakiTensor, ModelDescription, ModelInfo, ParamKind, Parameter,
};
use crate::losses::{l1_regularization, l2_regularization};
use crate::models::{ModelError, ModelResult};
use crate::optimizers::Optimizer;
use crate::runtime::{Feeds, SessionRef};
use crate::serialization::CheckpointStore;
use crate::tensor::{ContextRef, GraphContext, Tensor};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;
use tracing::{info, warn};

/// Lifecycle stage of a model. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelState {
    Declared,
    Bound,
    TrainingPrepared,
    LossBuilt,
    Training,
}

/// L1/L2 weight decay over `Weight` parameters.
///
/// A per-layer decay overrides the common one for that layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Regularization {
    pub l1: Option<f32>,
    pub l2: Option<f32>,
    layer_l1: BTreeMap<String, f32>,
    layer_l2: BTreeMap<String, f32>,
}

impl Regularization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_l1(mut self, decay: f32) -> Self {
        self.l1 = Some(decay);
        self
    }

    pub fn with_l2(mut self, decay: f32) -> Self {
        self.l2 = Some(decay);
        self
    }

    pub fn with_layer_l1(mut self, layer: &str, decay: f32) -> Self {
        self.layer_l1.insert(layer.to_string(), decay);
        self
    }

    pub fn with_layer_l2(mut self, layer: &str, decay: f32) -> Self {
        self.layer_l2.insert(layer.to_string(), decay);
        self
    }

    pub fn l1_decay(&self, layer: &str) -> Option<f32> {
        self.layer_l1.get(layer).copied().or(self.l1)
    }

    pub fn l2_decay(&self, layer: &str) -> Option<f32> {
        self.layer_l2.get(layer).copied().or(self.l2)
    }

    pub fn is_empty(&self) -> bool {
        self.l1.is_none() && self.l2.is_none() && self.layer_l1.is_empty() && self.layer_l2.is_empty()
    }
}

/// Training-mode forward graph.
#[derive(Debug, Clone)]
struct TrainingGraph {
    tensors: BTreeMap<String, Tensor>,
    outputs: Vec<Tensor>,
    trainable_vars: Vec<Tensor>,
    batch_size: usize,
}

/// Layer graph between a set of inputs and outputs, bound to one session.
pub struct Model {
    name: String,
    context: ContextRef,
    inputs: Vec<MakiTensor>,
    outputs: Vec<MakiTensor>,
    graph: CollectedGraph,
    extra_info: BTreeMap<String, serde_json::Value>,
    session: Option<SessionRef>,
    state: ModelState,
    frozen_layers: BTreeSet<String>,
    regularization: Regularization,
    training: Option<TrainingGraph>,
    initialized: BTreeSet<NodeId>,
}

impl Model {
    /// Collects everything reachable from `outputs`.
    ///
    /// Every input must be part of that graph.
    pub fn new(inputs: Vec<MakiTensor>, outputs: Vec<MakiTensor>, name: &str) -> ModelResult<Self> {
        let context = outputs
            .first()
            .map(|t| Rc::clone(&t.data().context))
            .ok_or_else(|| ModelError::DataMismatch("a model needs at least one output".to_string()))?;
        let graph = collect(&outputs)?;
        for input in &inputs {
            match graph.tensors.get(input.name()) {
                Some(t) if MakiTensor::ptr_eq(t, input) => {}
                _ => return Err(GraphError::UnknownTensor(input.name().to_string()).into()),
            }
        }
        Ok(Self {
            name: name.to_string(),
            context,
            inputs,
            outputs,
            graph,
            extra_info: BTreeMap::new(),
            session: None,
            state: ModelState::Declared,
            frozen_layers: BTreeSet::new(),
            regularization: Regularization::default(),
            training: None,
            initialized: BTreeSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    pub fn inputs(&self) -> &[MakiTensor] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[MakiTensor] {
        &self.outputs
    }

    pub fn tensors(&self) -> &BTreeMap<String, MakiTensor> {
        &self.graph.tensors
    }

    pub fn layers(&self) -> &BTreeMap<String, Rc<dyn Layer>> {
        &self.graph.layers
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Every parameter of every layer, ordered by layer name.
    pub fn parameters(&self) -> Vec<Parameter> {
        self.graph.layers.values().flat_map(|l| l.parameters()).collect()
    }

    /// Extra `MODEL_INFO` entries written next to the tensor names.
    pub(crate) fn set_extra_info(&mut self, key: &str, value: serde_json::Value) {
        self.extra_info.insert(key.to_string(), value);
    }

    pub(crate) fn advance(&mut self, state: ModelState) {
        self.state = self.state.max(state);
    }

    // --- Session ---

    /// Attaches `session` and initializes every variable of the graph.
    pub fn bind_session(&mut self, session: SessionRef) -> ModelResult<()> {
        if self.session.is_some() {
            return Err(ModelError::AlreadyBound);
        }
        let variables = self.context.borrow().graph().variables.clone();
        session.borrow_mut().initialize(self.context.borrow().graph(), &variables)?;
        self.initialized.extend(variables.iter().copied());
        self.session = Some(session);
        self.advance(ModelState::Bound);
        info!(model = %self.name, variables = variables.len(), "session bound");
        Ok(())
    }

    pub fn session(&self) -> ModelResult<&SessionRef> {
        self.session.as_ref().ok_or(ModelError::NotBound)
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_some()
    }

    /// Evaluates `fetches` through the bound session.
    pub fn run(&self, fetches: &[&Tensor], feeds: &Feeds) -> ModelResult<Vec<Value>> {
        let session = self.session()?;
        let ids: Vec<NodeId> = fetches.iter().map(|t| t.node_id).collect();
        let values = session.borrow_mut().run(self.context.borrow().graph(), &ids, feeds)?;
        Ok(values)
    }

    /// (Re-)initializes `variables`.
    pub(crate) fn initialize(&mut self, variables: &[Tensor]) -> ModelResult<()> {
        if variables.is_empty() {
            return Ok(());
        }
        let ids: Vec<NodeId> = variables.iter().map(|v| v.node_id).collect();
        self.session()?.borrow_mut().initialize(self.context.borrow().graph(), &ids)?;
        self.initialized.extend(ids);
        Ok(())
    }

    /// Initializes the variables among `variables` that never were.
    pub(crate) fn initialize_missing(&mut self, variables: &[Tensor]) -> ModelResult<()> {
        let fresh: Vec<Tensor> = variables
            .iter()
            .filter(|v| !self.initialized.contains(&v.node_id))
            .cloned()
            .collect();
        self.initialize(&fresh)
    }

    // --- Topology settings ---

    /// Marks layers as trainable or frozen.
    pub fn set_layers_trainable(&mut self, layers: &[(&str, bool)]) -> ModelResult<()> {
        self.ensure_not_frozen("change trainable layers")?;
        for (name, trainable) in layers {
            if !self.graph.layers.contains_key(*name) {
                return Err(ModelError::UnknownLayer(name.to_string()));
            }
            if *trainable {
                self.frozen_layers.remove(*name);
            } else {
                self.frozen_layers.insert(name.to_string());
            }
        }
        Ok(())
    }

    pub fn is_layer_trainable(&self, layer: &str) -> bool {
        !self.frozen_layers.contains(layer)
    }

    pub fn set_regularization(&mut self, regularization: Regularization) -> ModelResult<()> {
        self.ensure_not_frozen("change regularization")?;
        for layer in regularization.layer_l1.keys().chain(regularization.layer_l2.keys()) {
            if !self.graph.layers.contains_key(layer) {
                return Err(ModelError::UnknownLayer(layer.clone()));
            }
        }
        self.regularization = regularization;
        Ok(())
    }

    pub fn regularization(&self) -> &Regularization {
        &self.regularization
    }

    fn ensure_not_frozen(&self, action: &'static str) -> ModelResult<()> {
        if self.training.is_some() {
            return Err(ModelError::TrainingFrozen(action));
        }
        Ok(())
    }

    // --- Training ---

    /// Builds the training-mode forward graph. Later calls are no-ops.
    ///
    /// Layers are called again in dependency order with
    /// [`ComputationMode::Training`]; trainable variables are those of every
    /// layer not frozen, and the batch size is the first dimension of the
    /// first output.
    pub fn prepare_training(&mut self) -> ModelResult<()> {
        if self.training.is_some() {
            return Ok(());
        }
        self.session()?;

        let mut tensors: BTreeMap<String, Tensor> = BTreeMap::new();
        for tensor in dependency_order(&self.graph)? {
            let parents = tensor
                .parents()
                .iter()
                .map(|p| {
                    tensors
                        .get(p.name())
                        .cloned()
                        .ok_or_else(|| GraphError::UnknownTensor(p.name().to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let data = tensor.producer().forward(&parents, ComputationMode::Training)?;
            tensors.insert(tensor.name().to_string(), data);
        }

        let outputs = self
            .outputs
            .iter()
            .map(|o| tensors.get(o.name()).cloned().ok_or_else(|| GraphError::UnknownTensor(o.name().to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let batch_size = self.outputs[0].shape().first().copied().ok_or_else(|| {
            ModelError::DataMismatch(format!("output '{}' has no batch dimension", self.outputs[0].name()))
        })?;
        let trainable_vars = self
            .graph
            .layers
            .iter()
            .filter(|(name, _)| self.is_layer_trainable(name))
            .flat_map(|(_, layer)| layer.parameters())
            .map(|p| p.tensor)
            .collect();

        self.training = Some(TrainingGraph { tensors, outputs, trainable_vars, batch_size });
        self.advance(ModelState::TrainingPrepared);
        Ok(())
    }

    fn training(&self) -> ModelResult<&TrainingGraph> {
        self.training
            .as_ref()
            .ok_or_else(|| ModelError::DataMismatch("training is not prepared".to_string()))
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.training.as_ref().map(|t| t.batch_size)
    }

    pub fn training_outputs(&self) -> ModelResult<&[Tensor]> {
        Ok(&self.training()?.outputs)
    }

    /// Training-mode counterpart of the tensor called `name`.
    pub fn training_tensor(&self, name: &str) -> ModelResult<Tensor> {
        self.training()?
            .tensors
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownTensor(name.to_string()).into())
    }

    pub fn trainable_vars(&self) -> ModelResult<&[Tensor]> {
        Ok(&self.training()?.trainable_vars)
    }

    /// `loss` plus the regularization terms. `loss` must be a scalar.
    pub fn build_final_loss(&self, loss: Tensor) -> ModelResult<Tensor> {
        match loss.shape() {
            Some(shape) if shape.is_empty() => {}
            other => return Err(ModelError::NonScalarLoss(other)),
        }
        if self.regularization.is_empty() {
            return Ok(loss);
        }

        let mut l1: BTreeMap<u32, Vec<Tensor>> = BTreeMap::new();
        let mut l2: BTreeMap<u32, Vec<Tensor>> = BTreeMap::new();
        for (name, layer) in &self.graph.layers {
            let weights: Vec<Tensor> = layer
                .parameters()
                .into_iter()
                .filter(|p| p.kind == ParamKind::Weight)
                .map(|p| p.tensor)
                .collect();
            if let Some(decay) = self.regularization.l1_decay(name) {
                l1.entry(decay.to_bits()).or_default().extend(weights.iter().cloned());
            }
            if let Some(decay) = self.regularization.l2_decay(name) {
                l2.entry(decay.to_bits()).or_default().extend(weights);
            }
        }

        let terms = l1
            .iter()
            .filter_map(|(decay, w)| l1_regularization(w, f32::from_bits(*decay)))
            .chain(l2.iter().filter_map(|(decay, w)| l2_regularization(w, f32::from_bits(*decay))));
        Ok(terms.fold(loss, |acc, term| &acc + &term))
    }

    // --- Checkpoints ---

    /// Writes the current value of every parameter into `store`.
    pub fn save_weights(&self, store: &mut dyn CheckpointStore) -> ModelResult<()> {
        let params = self.parameters();
        let fetches: Vec<&Tensor> = params.iter().map(|p| &p.tensor).collect();
        let values = self.run(&fetches, &Feeds::new())?;
        for (param, value) in params.iter().zip(values) {
            store.put(&param.name, value);
        }
        info!(model = %self.name, parameters = params.len(), "weights saved");
        Ok(())
    }

    /// Assigns every parameter found in `store`; missing names are skipped.
    ///
    /// Returns how many parameters were loaded.
    pub fn load_weights(&self, store: &dyn CheckpointStore) -> ModelResult<usize> {
        let session = self.session()?;
        let mut loaded = 0;
        for param in self.parameters() {
            match store.get(&param.name) {
                Some(value) => {
                    session.borrow_mut().assign(self.context.borrow().graph(), param.tensor.node_id, value)?;
                    loaded += 1;
                }
                None => warn!(parameter = %param.name, "not found in checkpoint, skipped"),
            }
        }
        info!(model = %self.name, loaded, "weights loaded");
        Ok(loaded)
    }

    // --- Architecture ---

    pub fn describe(&self) -> ModelResult<ModelDescription> {
        Ok(ModelDescription {
            model_info: ModelInfo {
                input_mt: self.inputs.first().map(|t| t.name().to_string()).unwrap_or_default(),
                output_mt: self.outputs[0].name().to_string(),
                name: self.name.clone(),
                extra: self.extra_info.clone(),
            },
            graph_info: serialize(&self.graph)?,
        })
    }

    pub fn to_json_string(&self) -> ModelResult<String> {
        serde_json::to_string_pretty(&self.describe()?).map_err(|e| GraphError::from(e).into())
    }

    pub fn save_architecture(&self, path: impl AsRef<Path>) -> ModelResult<()> {
        std::fs::write(path.as_ref(), self.to_json_string()?).map_err(GraphError::from)?;
        info!(model = %self.name, path = %path.as_ref().display(), "architecture saved");
        Ok(())
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("inputs", &self.inputs.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("outputs", &self.outputs.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("state", &self.state)
            .field("bound", &self.session.is_some())
            .finish()
    }
}

/// Tensors rebuilt from a graph description, in a fresh context.
#[derive(Debug)]
pub struct RestoredGraph {
    pub info: ModelInfo,
    pub context: ContextRef,
    pub tensors: BTreeMap<String, MakiTensor>,
}

impl RestoredGraph {
    pub fn from_json_str(json: &str, registry: &LayerRegistry) -> ModelResult<Self> {
        let description: ModelDescription = serde_json::from_str(json).map_err(GraphError::from)?;
        let context = GraphContext::new_ref();
        let tensors = restore(&context, &description.graph_info, registry)?;
        Ok(Self { info: description.model_info, context, tensors })
    }

    pub fn from_json(path: impl AsRef<Path>, registry: &LayerRegistry) -> ModelResult<Self> {
        let json = std::fs::read_to_string(path).map_err(GraphError::from)?;
        Self::from_json_str(&json, registry)
    }

    pub fn tensor(&self, name: &str) -> ModelResult<MakiTensor> {
        self.tensors
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownTensor(name.to_string()).into())
    }

    /// A string entry of `MODEL_INFO` beyond the standard ones.
    pub fn extra_str(&self, key: &str) -> ModelResult<&str> {
        self.info
            .extra
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| GraphError::UnknownTensor(key.to_string()).into())
    }
}

/// One training objective of a model and the update op bound to it.
///
/// The loss is built once. Binding another optimizer (compared by pointer)
/// re-runs `minimize` on the same loss.
#[derive(Default)]
pub struct LossSlot {
    loss: Option<Tensor>,
    optimizer: Option<Rc<dyn Optimizer>>,
    train_op: Option<Tensor>,
    builds: usize,
}

impl LossSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the loss was built.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn loss(&self) -> Option<&Tensor> {
        self.loss.as_ref()
    }

    pub fn train_op(&self) -> Option<&Tensor> {
        self.train_op.as_ref()
    }

    /// Returns `(final loss, update op)` for `optimizer`.
    ///
    /// On the first call `build` produces the task loss, which is completed by
    /// [`Model::build_final_loss`]. The optimizer's slot variables are
    /// initialized every time a new optimizer is bound.
    pub(crate) fn minimize(
        &mut self,
        model: &mut Model,
        optimizer: &Rc<dyn Optimizer>,
        global_step: Option<&Tensor>,
        build: impl FnOnce(&Model) -> ModelResult<Tensor>,
    ) -> ModelResult<(Tensor, Tensor)> {
        let loss = match &self.loss {
            Some(loss) => loss.clone(),
            None => {
                let loss = model.build_final_loss(build(&*model)?)?;
                self.builds += 1;
                info!(model = %model.name(), "loss is built");
                self.loss = Some(loss.clone());
                loss
            }
        };

        let bound = self.optimizer.as_ref().map_or(false, |o| same_optimizer(o, optimizer));
        let train_op = match (&self.train_op, bound) {
            (Some(op), true) => op.clone(),
            _ => {
                if self.optimizer.is_some() {
                    info!(model = %model.name(), "new optimizer is used");
                }
                let op = optimizer.minimize(&loss, model.trainable_vars()?, global_step)?;
                model.initialize(&optimizer.variables())?;
                if let Some(step) = global_step {
                    model.initialize_missing(std::slice::from_ref(step))?;
                }
                self.optimizer = Some(Rc::clone(optimizer));
                self.train_op = Some(op.clone());
                op
            }
        };
        model.advance(ModelState::LossBuilt);
        Ok((loss, train_op))
    }
}

fn same_optimizer(a: &Rc<dyn Optimizer>, b: &Rc<dyn Optimizer>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl std::fmt::Debug for LossSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LossSlot")
            .field("loss", &self.loss)
            .field("train_op", &self.train_op)
            .field("builds", &self.builds)
            .finish()
    }
}

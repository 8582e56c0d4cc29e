//! Scripted executor shared by the integration tests.
//!
//! Variables are materialized with random or constant values, fetched
//! scalars are read from a loss script, and every other fetch is answered
//! with zeros of its static shape unless a responder overrides it.

#![allow(dead_code)]

use makiflow::asg::{Asg, DType, InitType, NodeId, NodeType, Value};
use makiflow::runtime::{Executor, Feeds, RuntimeError, SessionRef};
use ndarray::ArrayD;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub type Responder = Box<dyn Fn(&Asg, NodeId, &Feeds) -> Option<Value>>;

#[derive(Default)]
pub struct ScriptedExecutor {
    pub variables: HashMap<NodeId, Value>,
    /// Values returned for fetched scalars, cycled.
    pub losses: Vec<f32>,
    /// Fail the run with this (1-based) index.
    pub fail_at_run: Option<usize>,
    pub responder: Option<Responder>,
    pub runs: usize,
    pub update_steps: usize,
    pub iterator_pulls: usize,
    pub initialized: Vec<NodeId>,
    loss_cursor: usize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_losses(mut self, losses: &[f32]) -> Self {
        self.losses = losses.to_vec();
        self
    }

    pub fn failing_at(mut self, run: usize) -> Self {
        self.fail_at_run = Some(run);
        self
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn shared(self) -> (Rc<RefCell<ScriptedExecutor>>, SessionRef) {
        let executor = Rc::new(RefCell::new(self));
        let session: SessionRef = executor.clone();
        (executor, session)
    }

    fn next_loss(&mut self) -> f32 {
        if self.losses.is_empty() {
            return 0.5;
        }
        let loss = self.losses[self.loss_cursor % self.losses.len()];
        self.loss_cursor += 1;
        loss
    }

    /// Checks that every input reachable from `fetches` is fed.
    fn check_feeds(&mut self, graph: &Asg, fetches: &[NodeId], feeds: &Feeds) -> Result<(), RuntimeError> {
        let mut stack: Vec<NodeId> = fetches.to_vec();
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) || feeds.contains_key(&id) {
                continue;
            }
            let node = graph.get_node(id).map_err(|_| RuntimeError::NodeNotFound(id))?;
            match &node.node_type {
                NodeType::Input { name } => return Err(RuntimeError::MissingInput(name.clone(), id)),
                NodeType::Variable { name, .. } if !self.variables.contains_key(&id) => {
                    return Err(RuntimeError::UninitializedVariable(name.clone(), id));
                }
                NodeType::IteratorGetNext { .. } => self.iterator_pulls += 1,
                other => stack.extend(other.operands()),
            }
        }
        Ok(())
    }
}

impl Executor for ScriptedExecutor {
    fn initialize(&mut self, graph: &Asg, variables: &[NodeId]) -> Result<(), RuntimeError> {
        for &id in variables {
            let node = graph.get_node(id).map_err(|_| RuntimeError::NodeNotFound(id))?;
            let shape = node.shape.clone().unwrap_or_default();
            let value = match (&node.node_type, node.dtype) {
                (_, DType::I32) => Value::IntTensor(ArrayD::zeros(shape)),
                (NodeType::Variable { init: InitType::Zeros, .. }, _) => Value::Tensor(ArrayD::zeros(shape)),
                (NodeType::Variable { init: InitType::Constant(c), .. }, _) => {
                    Value::Tensor(ArrayD::from_elem(shape, *c))
                }
                (NodeType::Variable { .. }, _) => Value::Tensor(ArrayD::random(shape, Uniform::new(-0.1f32, 0.1))),
                (other, _) => {
                    return Err(RuntimeError::TypeError {
                        expected: "Variable".to_string(),
                        actual: format!("{:?}", other),
                    })
                }
            };
            self.variables.insert(id, value);
            self.initialized.push(id);
        }
        Ok(())
    }

    fn run(&mut self, graph: &Asg, fetches: &[NodeId], feeds: &Feeds) -> Result<Vec<Value>, RuntimeError> {
        self.runs += 1;
        if self.fail_at_run == Some(self.runs) {
            return Err(RuntimeError::ComputationError(format!("scripted failure at run {}", self.runs)));
        }
        self.check_feeds(graph, fetches, feeds)?;

        let mut values = Vec::with_capacity(fetches.len());
        for &id in fetches {
            if let Some(value) = self.responder.as_ref().and_then(|r| r(graph, id, feeds)) {
                values.push(value);
                continue;
            }
            let node = graph.get_node(id).map_err(|_| RuntimeError::NodeNotFound(id))?;
            let value = match &node.node_type {
                NodeType::Variable { .. } => self.variables[&id].clone(),
                NodeType::ApplyUpdates { .. } => {
                    self.update_steps += 1;
                    Value::ScalarF32(0.0)
                }
                _ => match node.shape.as_deref() {
                    Some([]) => Value::ScalarF32(self.next_loss()),
                    Some(shape) => Value::Tensor(ArrayD::zeros(shape.to_vec())),
                    None => return Err(RuntimeError::ShapeError(format!("node {} has no shape", id))),
                },
            };
            values.push(value);
        }
        Ok(values)
    }

    fn assign(&mut self, graph: &Asg, variable: NodeId, value: Value) -> Result<(), RuntimeError> {
        match graph.get_node(variable).map(|n| &n.node_type) {
            Ok(NodeType::Variable { .. }) => {
                self.variables.insert(variable, value);
                Ok(())
            }
            _ => Err(RuntimeError::NodeNotFound(variable)),
        }
    }
}

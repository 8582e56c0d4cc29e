//! Abstract interface for the session that evaluates an [`Asg`].

use crate::asg::{Asg, NodeId, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// Errors an executor reports while evaluating the graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("node {0} is not part of the graph handed to the executor")]
    NodeNotFound(NodeId),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    #[error("shape error: {0}")]
    ShapeError(String),

    #[error("no value fed for input '{0}' (node {1})")]
    MissingInput(String, NodeId),

    #[error("variable '{0}' (node {1}) is used before initialization")]
    UninitializedVariable(String, NodeId),

    #[error("operation '{0}' is not supported by this executor")]
    UnimplementedOperation(String),

    #[error("data pipeline '{0}' is exhausted")]
    EndOfSequence(String),

    #[error("computation failed: {0}")]
    ComputationError(String),
}

/// Values fed into input nodes for one run.
pub type Feeds = HashMap<NodeId, Value>;

/// Shared handle to the session bound to a model.
pub type SessionRef = Rc<RefCell<dyn Executor>>;

/// A session able to evaluate nodes of an op graph.
///
/// Implementations own the variable storage: `initialize` fills variables
/// according to their `InitType`, `assign` overwrites one, and evaluating an
/// `ApplyUpdates` node performs one optimizer step on the listed variables.
pub trait Executor {
    /// Initializes (or re-initializes) the given variables.
    fn initialize(&mut self, graph: &Asg, variables: &[NodeId]) -> Result<(), RuntimeError>;

    /// Evaluates `fetches` in order. Every input reachable from a fetch must be in `feeds`.
    fn run(&mut self, graph: &Asg, fetches: &[NodeId], feeds: &Feeds) -> Result<Vec<Value>, RuntimeError>;

    /// Overwrites the current value of a variable.
    fn assign(&mut self, graph: &Asg, variable: NodeId, value: Value) -> Result<(), RuntimeError>;
}

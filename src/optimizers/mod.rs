//! Optimizers that bind a loss to an update op.
//!
//! An optimizer does not touch numbers. `minimize` appends an
//! `ApplyUpdates` node describing the update rule, the loss and the
//! variables to adjust; the executor carries the step out when that node
//! is fetched. Slot variables (moments, accumulators) are created as
//! ordinary variables and reported by `variables` so the model can
//! initialize them.

use crate::asg::{AsgResult, DType, InitType, NodeType};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Plain-data description of an update rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateRule {
    Sgd { learning_rate: f32 },
    Adam { learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32 },
    RmsProp { learning_rate: f32, decay: f32, momentum: f32, epsilon: f32 },
    /// Rule of an optimizer defined outside this crate. The executor
    /// dispatches on `name`.
    Custom { name: String, hyper: BTreeMap<String, f32> },
}

/// Common interface for all optimizers.
pub trait Optimizer {
    /// Builds the update op minimizing `loss` over `var_list`.
    ///
    /// When `global_step` is given, the executor increments it with every step.
    fn minimize(&self, loss: &Tensor, var_list: &[Tensor], global_step: Option<&Tensor>) -> AsgResult<Tensor>;

    /// Internal state variables created so far that need initialization.
    fn variables(&self) -> Vec<Tensor>;
}

/// Appends the `ApplyUpdates` node shared by every stock optimizer.
pub fn apply_updates(
    rule: UpdateRule,
    loss: &Tensor,
    var_list: &[Tensor],
    slots: &[Tensor],
    global_step: Option<&Tensor>,
) -> Tensor {
    Tensor::from_context(
        &loss.context,
        None,
        NodeType::ApplyUpdates {
            rule,
            loss: loss.node_id,
            variables: var_list.iter().map(|v| v.node_id).collect(),
            slots: slots.iter().map(|s| s.node_id).collect(),
            global_step: global_step.map(|g| g.node_id),
        },
        Some(vec![]),
        DType::F32,
    )
}

/// Creates one zero-initialized slot per variable, named `{var}/{suffix}`.
pub fn create_slots(var_list: &[Tensor], suffix: &str) -> AsgResult<Vec<Tensor>> {
    let mut slots = Vec::with_capacity(var_list.len());
    for var in var_list {
        let (name, shape) = {
            let ctx = var.context.borrow();
            let node = ctx.graph().get_node(var.node_id)?;
            let name = node.name.clone().unwrap_or_else(|| format!("node_{}", var.node_id));
            (name, node.shape.clone().unwrap_or_default())
        };
        slots.push(Tensor::new_variable(
            &var.context,
            &format!("{}/{}", name, suffix),
            shape,
            InitType::Zeros,
        ));
    }
    Ok(slots)
}

/// Stochastic gradient descent.
#[derive(Debug)]
pub struct Sgd {
    lr: f32,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl Optimizer for Sgd {
    fn minimize(&self, loss: &Tensor, var_list: &[Tensor], global_step: Option<&Tensor>) -> AsgResult<Tensor> {
        Ok(apply_updates(UpdateRule::Sgd { learning_rate: self.lr }, loss, var_list, &[], global_step))
    }

    fn variables(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

/// Adam with first and second moment slots.
#[derive(Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    slots: RefCell<Vec<Tensor>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self { lr, beta1: 0.9, beta2: 0.999, epsilon: 1e-8, slots: RefCell::new(Vec::new()) }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }
}

impl Optimizer for Adam {
    fn minimize(&self, loss: &Tensor, var_list: &[Tensor], global_step: Option<&Tensor>) -> AsgResult<Tensor> {
        let mut slots = create_slots(var_list, "Adam")?;
        slots.extend(create_slots(var_list, "Adam_1")?);
        let rule = UpdateRule::Adam {
            learning_rate: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
        };
        let op = apply_updates(rule, loss, var_list, &slots, global_step);
        self.slots.borrow_mut().extend(slots);
        Ok(op)
    }

    fn variables(&self) -> Vec<Tensor> {
        self.slots.borrow().clone()
    }
}

/// RMSProp with mean-square and momentum slots.
#[derive(Debug)]
pub struct RmsProp {
    lr: f32,
    decay: f32,
    momentum: f32,
    epsilon: f32,
    slots: RefCell<Vec<Tensor>>,
}

impl RmsProp {
    pub fn new(lr: f32) -> Self {
        Self { lr, decay: 0.9, momentum: 0.0, epsilon: 1e-10, slots: RefCell::new(Vec::new()) }
    }

    pub fn with_decay(mut self, decay: f32) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }
}

impl Optimizer for RmsProp {
    fn minimize(&self, loss: &Tensor, var_list: &[Tensor], global_step: Option<&Tensor>) -> AsgResult<Tensor> {
        let mut slots = create_slots(var_list, "RMSProp")?;
        slots.extend(create_slots(var_list, "RMSProp_1")?);
        let rule = UpdateRule::RmsProp {
            learning_rate: self.lr,
            decay: self.decay,
            momentum: self.momentum,
            epsilon: self.epsilon,
        };
        let op = apply_updates(rule, loss, var_list, &slots, global_step);
        self.slots.borrow_mut().extend(slots);
        Ok(op)
    }

    fn variables(&self) -> Vec<Tensor> {
        self.slots.borrow().clone()
    }
}

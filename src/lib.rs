//! # makiflow: layers and models over a pluggable tensor executor
//!
//! Layers append nodes to a symbolic op graph (the **ASG**); models bind
//! that graph to an [`Executor`](runtime::Executor) supplied by the caller
//! and drive training and inference through it. No numeric kernels live in
//! this crate.
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use makiflow::graph::call;
//! use makiflow::models::Classificator;
//! use makiflow::nn::{DenseLayer, InputLayer};
//! use makiflow::tensor::GraphContext;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 1. Create graph context
//! let ctx = GraphContext::new_ref();
//!
//! // 2. Declare the layer graph
//! let x = InputLayer::input(&ctx, vec![32, 784], "input")?;
//! let h = call(Rc::new(DenseLayer::new(&ctx, 784, 100, "dense1")), &[&x])?;
//! let logits = call(Rc::new(DenseLayer::new(&ctx, 100, 10, "logits")), &[&h])?;
//!
//! // 3. Wrap it into a model; bind an executor before training
//! let model = Classificator::new(x, logits, "mnist")?;
//! println!("{}", model.to_json_string()?);
//! # Ok(())
//! # }
//! ```

pub mod asg;
pub mod generators;
pub mod graph;
pub mod losses;
pub mod metrics;
pub mod models;
pub mod nn;
pub mod optimizers;
pub mod runtime;
pub mod serialization;
pub mod tensor;

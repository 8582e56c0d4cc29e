//! Integration tests for model binding, loss building and the fit loops,
//! driven by a scripted executor.

mod common;

use common::ScriptedExecutor;
use makiflow::asg::{Activation, NodeType, Value};
use makiflow::generators::{Generator, NNRIterator};
use makiflow::graph::call;
use makiflow::models::{Classificator, FitConfig, ModelError, ModelState, NeuralRender, Regularization};
use makiflow::nn::{ConvLayer, DenseLayer, InputLayer, NeuralTextureLayer};
use makiflow::optimizers::{Adam, Optimizer, Sgd};
use makiflow::serialization::{CheckpointStore, MemoryCheckpoint};
use makiflow::tensor::{ContextRef, GraphContext, Tensor};
use ndarray::{Array1, ArrayD, Axis, IxDyn};
use std::rc::Rc;

fn classifier() -> Classificator {
    let ctx = GraphContext::new_ref();
    let x = InputLayer::input(&ctx, vec![16, 20], "input").unwrap();
    let h = call(Rc::new(DenseLayer::new(&ctx, 20, 32, "dense1")), &[&x]).unwrap();
    let y = call(Rc::new(DenseLayer::new(&ctx, 32, 10, "dense2")), &[&h]).unwrap();
    Classificator::new(x, y, "clf").unwrap()
}

fn dataset(n: usize) -> (ArrayD<f32>, Array1<i32>) {
    let x = ArrayD::from_shape_fn(IxDyn(&[n, 20]), |ix| (ix[0] % 10) as f32);
    let y = Array1::from_shape_fn(n, |i| (i % 10) as i32);
    (x, y)
}

fn adam() -> Rc<dyn Optimizer> {
    Rc::new(Adam::new(1e-3))
}

fn count_nodes(ctx: &ContextRef, pred: impl Fn(&NodeType) -> bool) -> usize {
    ctx.borrow().graph().nodes.values().filter(|n| pred(&n.node_type)).count()
}

#[test]
fn fit_runs_floor_n_over_batch_steps_per_epoch() {
    let mut clf = classifier();
    let (executor, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();

    let (x, y) = dataset(100);
    let history = clf.fit_ce(&x, &y, &adam(), &FitConfig::new(3).with_seed(7)).unwrap();

    assert!(history.is_complete());
    assert_eq!(history.epochs(), 3);
    assert_eq!(executor.borrow().update_steps, 3 * 6);
    assert_eq!(clf.model().batch_size(), Some(16));
    assert_eq!(clf.model().state(), ModelState::Training);
}

#[test]
fn epoch_loss_is_the_mean_of_batch_losses() {
    let mut clf = classifier();
    let batch_losses = [0.9, 0.3, 0.6, 0.2, 0.5, 0.1];
    let (_, session) = ScriptedExecutor::new().with_losses(&batch_losses).shared();
    clf.bind_session(session).unwrap();

    let (x, y) = dataset(100);
    let history = clf.fit_ce(&x, &y, &adam(), &FitConfig::new(2).with_shuffle(false)).unwrap();

    let expected = batch_losses.iter().sum::<f32>() / batch_losses.len() as f32;
    assert_eq!(history.losses.len(), 2);
    for loss in &history.losses {
        assert!((loss - expected).abs() < 1e-6);
    }
}

#[test]
fn new_optimizer_reuses_the_built_loss() {
    let mut clf = classifier();
    let (executor, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();
    let ctx = clf.model().context().clone();
    let (x, y) = dataset(32);
    let config = FitConfig::new(1);

    let first = adam();
    clf.fit_ce(&x, &y, &first, &config).unwrap();
    let loss = clf.ce_loss().loss().cloned();
    clf.fit_ce(&x, &y, &first, &config).unwrap();
    assert_eq!(count_nodes(&ctx, |n| matches!(n, NodeType::ApplyUpdates { .. })), 1);

    let second: Rc<dyn Optimizer> = Rc::new(Sgd::new(0.1));
    clf.fit_ce(&x, &y, &second, &config).unwrap();

    assert_eq!(clf.ce_loss().builds(), 1);
    assert_eq!(clf.ce_loss().loss().cloned(), loss);
    assert_eq!(count_nodes(&ctx, |n| matches!(n, NodeType::SparseSoftmaxCrossEntropy { .. })), 1);
    assert_eq!(count_nodes(&ctx, |n| matches!(n, NodeType::ApplyUpdates { .. })), 2);
    assert_eq!(executor.borrow().update_steps, 3 * 2);
}

#[test]
fn optimizer_slots_are_initialized() {
    let mut clf = classifier();
    let (executor, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();
    let initialized_at_bind = executor.borrow().initialized.len();
    assert_eq!(initialized_at_bind, 4);

    let (x, y) = dataset(16);
    let optimizer = adam();
    clf.fit_ce(&x, &y, &optimizer, &FitConfig::new(1)).unwrap();

    let slots = optimizer.variables();
    assert_eq!(slots.len(), 8);
    let executor = executor.borrow();
    assert!(slots.iter().all(|s| executor.initialized.contains(&s.node_id)));
}

#[test]
fn global_step_is_passed_to_the_update() {
    let mut clf = classifier();
    let (_, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();
    let step = Tensor::global_step(clf.model().context());

    let (x, y) = dataset(16);
    clf.fit_ce(&x, &y, &adam(), &FitConfig::new(1).with_global_step(step.clone())).unwrap();

    let ctx = clf.model().context().borrow();
    let global_step = ctx.graph().nodes.values().find_map(|n| match &n.node_type {
        NodeType::ApplyUpdates { global_step, .. } => *global_step,
        _ => None,
    });
    assert_eq!(global_step, Some(step.node_id));
}

#[test]
fn calls_before_binding_fail_with_not_bound() {
    let mut clf = classifier();
    let (x, y) = dataset(32);
    assert!(matches!(clf.fit_ce(&x, &y, &adam(), &FitConfig::new(1)), Err(ModelError::NotBound)));
    assert!(matches!(clf.predict(&x, true), Err(ModelError::NotBound)));
    assert!(matches!(clf.evaluate(&x, &y), Err(ModelError::NotBound)));
    assert_eq!(clf.model().state(), ModelState::Declared);
}

#[test]
fn binding_twice_fails() {
    let mut clf = classifier();
    let (_, first) = ScriptedExecutor::new().shared();
    let (_, second) = ScriptedExecutor::new().shared();
    clf.bind_session(first).unwrap();
    assert!(matches!(clf.bind_session(second), Err(ModelError::AlreadyBound)));
}

#[test]
fn topology_settings_freeze_once_training_is_prepared() {
    let mut clf = classifier();
    let (_, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();
    clf.model_mut().set_layers_trainable(&[("dense1", false)]).unwrap();
    clf.model_mut().set_regularization(Regularization::new().with_l2(1e-4)).unwrap();

    let (x, y) = dataset(16);
    clf.fit_ce(&x, &y, &adam(), &FitConfig::new(1)).unwrap();

    assert_eq!(clf.model().trainable_vars().unwrap().len(), 2);
    assert!(matches!(
        clf.model_mut().set_layers_trainable(&[("dense1", true)]),
        Err(ModelError::TrainingFrozen(_))
    ));
    assert!(matches!(
        clf.model_mut().set_regularization(Regularization::new()),
        Err(ModelError::TrainingFrozen(_))
    ));
}

#[test]
fn failure_mid_training_returns_partial_history() {
    let mut clf = classifier();
    // 6 steps per epoch; the 9th run is the third step of the second epoch.
    let (executor, session) = ScriptedExecutor::new().failing_at(9).shared();
    clf.bind_session(session).unwrap();

    let (x, y) = dataset(100);
    let history = clf.fit_ce(&x, &y, &adam(), &FitConfig::new(5)).unwrap();

    assert_eq!(history.epochs(), 1);
    assert!(matches!(history.error, Some(ModelError::Runtime(_))));
    assert_eq!(executor.borrow().runs, 9);
}

#[test]
fn malformed_data_is_rejected_before_training() {
    let mut clf = classifier();
    let (executor, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();

    let (x, _) = dataset(32);
    let (_, y) = dataset(31);
    assert!(matches!(clf.fit_ce(&x, &y, &adam(), &FitConfig::new(1)), Err(ModelError::DataMismatch(_))));

    let (x, y) = dataset(10);
    assert!(matches!(clf.fit_ce(&x, &y, &adam(), &FitConfig::new(1)), Err(ModelError::DataMismatch(_))));
    assert_eq!(executor.borrow().runs, 0);
}

#[test]
fn predict_concatenates_full_batches() {
    let mut clf = classifier();
    let (executor, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();

    let (x, _) = dataset(40);
    let out = clf.predict(&x, false).unwrap();
    assert_eq!(out.shape(), &[32, 10]);
    assert_eq!(executor.borrow().runs, 2);
}

/// Softmax output puts 0.91 on class `x[i, 0]`.
fn softmax_from_first_feature() -> common::Responder {
    Box::new(|graph, id, feeds| {
        let node = graph.get_node(id).ok()?;
        if !matches!(node.node_type, NodeType::Activation(_, Activation::Softmax)) {
            return None;
        }
        let x = feeds.values().next()?.as_tensor()?;
        let mut probs = ArrayD::from_elem(IxDyn(&[x.len_of(Axis(0)), 10]), 0.01f32);
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            probs[[i, row[[0]] as usize]] = 0.91;
        }
        Some(Value::Tensor(probs))
    })
}

#[test]
fn evaluate_reports_error_rate_and_cross_entropy() {
    let mut clf = classifier();
    let (_, session) = ScriptedExecutor::new().with_responder(softmax_from_first_feature()).shared();
    clf.bind_session(session).unwrap();

    let (x, mut y) = dataset(36);
    // Corrupt 8 of the 32 evaluated labels; the last 4 samples are dropped.
    for i in 0..8 {
        y[i * 4] = (y[i * 4] + 1) % 10;
    }
    let (error_rate, cost) = clf.evaluate(&x, &y).unwrap();

    assert!((error_rate - 0.25).abs() < 1e-6);
    let expected = 0.75 * -(0.91f32).ln() + 0.25 * -(0.01f32).ln();
    assert!((cost - expected).abs() < 1e-4);
}

#[test]
fn weights_round_trip_through_a_checkpoint() {
    let mut clf = classifier();
    let (_, session) = ScriptedExecutor::new().shared();
    clf.bind_session(session).unwrap();

    let mut store = MemoryCheckpoint::new();
    clf.model().save_weights(&mut store).unwrap();
    assert_eq!(
        store.names(),
        vec!["dense1/bias", "dense1/weights", "dense2/bias", "dense2/weights"]
    );

    let mut restored = Classificator::from_json_str(&clf.to_json_string().unwrap()).unwrap();
    let (executor, session) = ScriptedExecutor::new().shared();
    restored.bind_session(session).unwrap();

    store.remove("dense2/bias");
    assert_eq!(restored.model().load_weights(&store).unwrap(), 3);

    let weights = restored
        .model()
        .parameters()
        .into_iter()
        .find(|p| p.name == "dense1/weights")
        .unwrap();
    assert_eq!(executor.borrow().variables[&weights.tensor.node_id], store.get("dense1/weights").unwrap());
}

// --- Neural renderer ---

fn renderer(ctx: &ContextRef, from_pipeline: bool) -> NeuralRender {
    let uv_layer = if from_pipeline {
        InputLayer::from_iterator(ctx, vec![2, 8, 8, 2], "train", NNRIterator::UV_MAP, "uv")
    } else {
        InputLayer::new(ctx, vec![2, 8, 8, 2], "uv")
    };
    let uv = call(Rc::new(uv_layer), &[]).unwrap();
    let texture = call(Rc::new(NeuralTextureLayer::new(ctx, 32, 32, 8, "texture")), &[&uv]).unwrap();
    let out = call(Rc::new(ConvLayer::new(ctx, 1, 1, 8, 3, "to_rgb")), &[&texture]).unwrap();
    NeuralRender::new(uv, out, texture, "nnr").unwrap()
}

#[test]
fn masked_mse_without_generator_fails() {
    let ctx = GraphContext::new_ref();
    let mut nnr = renderer(&ctx, false);
    let (executor, session) = ScriptedExecutor::new().shared();
    nnr.bind_session(session).unwrap();

    let result = nnr.gen_fit_masked_mse(&adam(), 10, &FitConfig::new(1));
    assert!(matches!(result, Err(ModelError::GeneratorNotSet)));
    assert!(matches!(nnr.gen_fit_abs(&adam(), 10, &FitConfig::new(1)), Err(ModelError::GeneratorNotSet)));
    assert_eq!(executor.borrow().runs, 0);
}

#[test]
fn generator_fit_pulls_batches_without_feeds() {
    let ctx = GraphContext::new_ref();
    let mut nnr = renderer(&ctx, true);
    let generator: Rc<dyn Generator> = Rc::new(NNRIterator::generator(&ctx, "train", 2, 8, 8));
    nnr.set_generator(generator).unwrap();
    let (executor, session) = ScriptedExecutor::new().shared();
    nnr.bind_session(session).unwrap();

    let history = nnr.gen_fit_masked_mse(&adam(), 7, &FitConfig::new(2)).unwrap();

    assert!(history.is_complete(), "{:?}", history.error);
    assert_eq!(history.losses.len(), 2);
    assert_eq!(executor.borrow().update_steps, 14);
    assert_eq!(nnr.masked_mse_loss_builds(), 1);
    // uv map, image and mask per step
    assert_eq!(executor.borrow().iterator_pulls, 3 * 14);
}

#[test]
fn generator_fed_abs_fit_runs_every_iteration() {
    let ctx = GraphContext::new_ref();
    let mut nnr = renderer(&ctx, true);
    let generator: Rc<dyn Generator> = Rc::new(NNRIterator::generator(&ctx, "train", 2, 8, 8));
    nnr.set_generator(generator).unwrap();
    let (executor, session) = ScriptedExecutor::new().with_losses(&[1.0, 3.0]).shared();
    nnr.bind_session(session).unwrap();

    let history = nnr.gen_fit_abs(&adam(), 4, &FitConfig::new(3)).unwrap();

    assert!(history.is_complete(), "{:?}", history.error);
    assert_eq!(history.losses, vec![2.0, 2.0, 2.0]);
    assert_eq!(executor.borrow().update_steps, 12);
    assert_eq!(executor.borrow().iterator_pulls, 2 * 12);
    assert_eq!(nnr.abs_loss_builds(), 1);
    assert_eq!(count_nodes(&ctx, |n| matches!(n, NodeType::Abs(_))), 1);
}

#[test]
fn rgb_texture_term_joins_every_objective() {
    let ctx = GraphContext::new_ref();
    let mut nnr = renderer(&ctx, false);
    nnr.set_learn_rgb_texture(0.5).unwrap();
    let (executor, session) = ScriptedExecutor::new().shared();
    nnr.bind_session(session).unwrap();

    let images = ArrayD::zeros(IxDyn(&[10, 8, 8, 3]));
    let uv_maps = ArrayD::zeros(IxDyn(&[10, 8, 8, 2]));
    let history = nnr.fit_abs(&images, &uv_maps, &adam(), &FitConfig::new(1)).unwrap();

    assert!(history.is_complete(), "{:?}", history.error);
    assert_eq!(executor.borrow().update_steps, 5);
    assert_eq!(count_nodes(&ctx, |n| matches!(n, NodeType::SliceLastAxis { start: 0, end: 3, .. })), 1);
    assert!(matches!(nnr.set_learn_rgb_texture(1.0), Err(ModelError::TrainingFrozen(_))));
}

#[test]
fn renderer_losses_are_built_once() {
    let ctx = GraphContext::new_ref();
    let mut nnr = renderer(&ctx, false);
    let (_, session) = ScriptedExecutor::new().shared();
    nnr.bind_session(session).unwrap();

    let images = ArrayD::zeros(IxDyn(&[4, 8, 8, 3]));
    let uv_maps = ArrayD::zeros(IxDyn(&[4, 8, 8, 2]));
    nnr.fit_abs(&images, &uv_maps, &adam(), &FitConfig::new(1)).unwrap();
    nnr.fit_abs(&images, &uv_maps, &(Rc::new(Sgd::new(0.01)) as Rc<dyn Optimizer>), &FitConfig::new(1))
        .unwrap();

    assert_eq!(nnr.abs_loss_builds(), 1);
    assert_eq!(count_nodes(&ctx, |n| matches!(n, NodeType::Abs(_))), 1);
}

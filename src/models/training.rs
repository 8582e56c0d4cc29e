//! Fit loops shared by every model variant.

use crate::asg::{NodeId, Value};
use crate::metrics::RunningMean;
use crate::models::{Model, ModelError, ModelResult, ModelState};
use crate::runtime::Feeds;
use crate::tensor::Tensor;
use ndarray::{Axis, Slice};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{error, info};

/// Options of one `fit` call.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs: usize,
    /// Shuffle array data before every epoch. Ignored by generator-fed fits.
    pub shuffle: bool,
    pub seed: Option<u64>,
    /// Incremented by the executor with every step.
    pub global_step: Option<Tensor>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self { epochs: 1, shuffle: true, seed: None, global_step: None }
    }
}

impl FitConfig {
    pub fn new(epochs: usize) -> Self {
        Self { epochs, ..Self::default() }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_global_step(mut self, global_step: Tensor) -> Self {
        self.global_step = Some(global_step);
        self
    }
}

/// Per-epoch losses of one fit call.
///
/// When training stops early, `losses` holds the completed epochs and
/// `error` the failure that stopped it.
#[derive(Debug)]
pub struct TrainHistory {
    pub loss_name: &'static str,
    pub losses: Vec<f32>,
    pub error: Option<ModelError>,
}

impl TrainHistory {
    pub fn new(loss_name: &'static str) -> Self {
        Self { loss_name, losses: Vec::new(), error: None }
    }

    pub fn epochs(&self) -> usize {
        self.losses.len()
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

/// Runs `epoch` for every epoch index and records its loss.
///
/// The first failing epoch stops the loop; the error is logged and kept in
/// the returned history.
pub(crate) fn run_epochs(
    loss_name: &'static str,
    epochs: usize,
    mut epoch: impl FnMut(usize) -> ModelResult<f32>,
) -> TrainHistory {
    let mut history = TrainHistory::new(loss_name);
    for i in 0..epochs {
        match epoch(i) {
            Ok(loss) => {
                info!(epoch = i, loss, "{}", loss_name);
                history.losses.push(loss);
            }
            Err(err) => {
                error!(epoch = i, error = %err, "training interrupted");
                history.error = Some(err);
                break;
            }
        }
    }
    history
}

/// Trains on host arrays fed to `data` placeholders.
///
/// Every array is split along axis 0 into `rows / batch_size` batches; the
/// remainder is dropped.
pub(crate) fn fit_arrays(
    model: &mut Model,
    loss: &Tensor,
    train_op: &Tensor,
    data: Vec<(NodeId, Value)>,
    config: &FitConfig,
    loss_name: &'static str,
) -> ModelResult<TrainHistory> {
    model.session()?;
    let batch_size = model
        .batch_size()
        .ok_or_else(|| ModelError::DataMismatch("training is not prepared".to_string()))?;
    let rows = check_rows(&data)?;
    let n_batches = rows / batch_size;
    if n_batches == 0 {
        return Err(ModelError::DataMismatch(format!(
            "{} samples do not fill one batch of {}",
            rows, batch_size
        )));
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut order: Vec<usize> = (0..rows).collect();
    model.advance(ModelState::Training);
    let model = &*model;

    Ok(run_epochs(loss_name, config.epochs, |_| {
        let epoch_data: Vec<(NodeId, Value)> = if config.shuffle {
            order.shuffle(&mut rng);
            data.iter().map(|(id, v)| (*id, select_rows(v, &order))).collect()
        } else {
            data.clone()
        };

        let mut mean = RunningMean::new();
        for j in 0..n_batches {
            let feeds: Feeds = epoch_data
                .iter()
                .map(|(id, v)| (*id, slice_rows(v, j * batch_size, (j + 1) * batch_size)))
                .collect();
            mean.update(train_step(model, loss, train_op, &feeds)? as f64);
        }
        Ok(mean.compute() as f32)
    }))
}

/// Trains on batches pulled by the executor from a generator pipeline.
pub(crate) fn fit_generator(
    model: &mut Model,
    loss: &Tensor,
    train_op: &Tensor,
    iterations: usize,
    config: &FitConfig,
    loss_name: &'static str,
) -> ModelResult<TrainHistory> {
    model.session()?;
    model.advance(ModelState::Training);
    let model = &*model;
    let feeds = Feeds::new();

    Ok(run_epochs(loss_name, config.epochs, |_| {
        let mut mean = RunningMean::new();
        for _ in 0..iterations {
            mean.update(train_step(model, loss, train_op, &feeds)? as f64);
        }
        Ok(mean.compute() as f32)
    }))
}

fn train_step(model: &Model, loss: &Tensor, train_op: &Tensor, feeds: &Feeds) -> ModelResult<f32> {
    let values = model.run(&[loss, train_op], feeds)?;
    let value = values
        .first()
        .ok_or_else(|| ModelError::DataMismatch("executor returned no loss value".to_string()))?;
    value.as_scalar().ok_or_else(|| ModelError::NonScalarLoss(Some(value.shape())))
}

/// Common number of rows of `data`.
pub(crate) fn check_rows(data: &[(NodeId, Value)]) -> ModelResult<usize> {
    let mut rows = None;
    for (id, value) in data {
        let n = match value {
            Value::Tensor(t) if t.ndim() > 0 => t.len_of(Axis(0)),
            Value::IntTensor(t) if t.ndim() > 0 => t.len_of(Axis(0)),
            _ => return Err(ModelError::DataMismatch(format!("data for node {} has no batch axis", id))),
        };
        match rows {
            Some(r) if r != n => {
                return Err(ModelError::DataMismatch(format!("arrays have {} and {} samples", r, n)));
            }
            _ => rows = Some(n),
        }
    }
    rows.ok_or_else(|| ModelError::DataMismatch("no training data".to_string()))
}

/// Rows `start..end` along axis 0.
pub(crate) fn slice_rows(value: &Value, start: usize, end: usize) -> Value {
    let slice = Slice::from(start..end);
    match value {
        Value::Tensor(t) => Value::Tensor(t.slice_axis(Axis(0), slice).to_owned()),
        Value::IntTensor(t) => Value::IntTensor(t.slice_axis(Axis(0), slice).to_owned()),
        other => other.clone(),
    }
}

fn select_rows(value: &Value, rows: &[usize]) -> Value {
    match value {
        Value::Tensor(t) => Value::Tensor(t.select(Axis(0), rows)),
        Value::IntTensor(t) => Value::IntTensor(t.select(Axis(0), rows)),
        other => other.clone(),
    }
}

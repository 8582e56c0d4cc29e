//! Classifier over a logits output.

use crate::asg::{Activation, DType, Value};
use crate::graph::{LayerRegistry, MakiTensor};
use crate::losses;
use crate::metrics::{argmax_rows, error_rate, sparse_cross_entropy};
use crate::models::model::{LossSlot, Model, RestoredGraph};
use crate::models::training::{fit_arrays, slice_rows, FitConfig, TrainHistory};
use crate::models::{ModelError, ModelResult};
use crate::optimizers::Optimizer;
use crate::runtime::{Feeds, SessionRef};
use crate::tensor::Tensor;
use ndarray::{concatenate, Array1, ArrayD, Axis, Ix2};
use std::path::Path;
use std::rc::Rc;
use tracing::info;

pub const CE_LOSS: &str = "CE LOSS";

/// Added to softmax outputs before taking logs.
const EPSILON: f32 = 1e-37;

/// One input, one logits output.
#[derive(Debug)]
pub struct Classificator {
    model: Model,
    logits: Tensor,
    softmax: Tensor,
    labels: Option<Tensor>,
    ce_loss: LossSlot,
}

impl Classificator {
    pub fn new(input: MakiTensor, output: MakiTensor, name: &str) -> ModelResult<Self> {
        let logits = output.data().clone();
        let softmax = logits.activation(Activation::Softmax);
        let model = Model::new(vec![input], vec![output], name)?;
        Ok(Self { model, logits, softmax, labels: None, ce_loss: LossSlot::new() })
    }

    pub fn from_json(path: impl AsRef<Path>) -> ModelResult<Self> {
        Self::from_restored(RestoredGraph::from_json(path, &LayerRegistry::default())?)
    }

    pub fn from_json_str(json: &str) -> ModelResult<Self> {
        Self::from_json_str_with(json, &LayerRegistry::default())
    }

    /// Restores a classifier whose graph uses custom layer types.
    pub fn from_json_str_with(json: &str, registry: &LayerRegistry) -> ModelResult<Self> {
        Self::from_restored(RestoredGraph::from_json_str(json, registry)?)
    }

    fn from_restored(restored: RestoredGraph) -> ModelResult<Self> {
        let input = restored.tensor(&restored.info.input_mt)?;
        let output = restored.tensor(&restored.info.output_mt)?;
        info!(model = %restored.info.name, "model is restored");
        Self::new(input, output, &restored.info.name)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn bind_session(&mut self, session: SessionRef) -> ModelResult<()> {
        self.model.bind_session(session)
    }

    pub fn to_json_string(&self) -> ModelResult<String> {
        self.model.to_json_string()
    }

    pub fn save_architecture(&self, path: impl AsRef<Path>) -> ModelResult<()> {
        self.model.save_architecture(path)
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    pub fn ce_loss(&self) -> &LossSlot {
        &self.ce_loss
    }

    fn input(&self) -> &MakiTensor {
        &self.model.inputs()[0]
    }

    fn batch_size(&self) -> usize {
        self.input().shape().first().copied().unwrap_or(1)
    }

    fn batches(&self, rows: usize) -> ModelResult<usize> {
        let n = rows / self.batch_size();
        if n == 0 {
            return Err(ModelError::DataMismatch(format!(
                "{} samples do not fill one batch of {}",
                rows,
                self.batch_size()
            )));
        }
        Ok(n)
    }

    fn run_batch(&self, fetch: &Tensor, x: &Value, k: usize) -> ModelResult<ArrayD<f32>> {
        let bs = self.batch_size();
        let mut feeds = Feeds::new();
        feeds.insert(self.input().data().node_id, slice_rows(x, k * bs, (k + 1) * bs));
        let value = self.model.run(&[fetch], &feeds)?.into_iter().next();
        value
            .and_then(Value::into_tensor)
            .ok_or_else(|| ModelError::DataMismatch("executor returned no float tensor".to_string()))
    }

    /// Outputs for `x`, batch by batch, concatenated along axis 0.
    ///
    /// Samples past the last full batch are dropped.
    pub fn predict(&self, x: &ArrayD<f32>, use_softmax: bool) -> ModelResult<ArrayD<f32>> {
        self.model.session()?;
        let fetch = if use_softmax { &self.softmax } else { &self.logits };
        let x = Value::Tensor(x.clone());
        let n_batches = self.batches(x.shape().first().copied().unwrap_or(0))?;
        let outputs = (0..n_batches)
            .map(|k| self.run_batch(fetch, &x, k))
            .collect::<ModelResult<Vec<_>>>()?;
        let views: Vec<_> = outputs.iter().map(|o| o.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| ModelError::DataMismatch(e.to_string()))
    }

    /// `(error rate, mean sparse cross-entropy)` over the full batches of `x`.
    pub fn evaluate(&self, x: &ArrayD<f32>, y: &Array1<i32>) -> ModelResult<(f32, f32)> {
        self.model.session()?;
        let rows = x.shape().first().copied().unwrap_or(0);
        if rows != y.len() {
            return Err(ModelError::DataMismatch(format!("{} samples but {} labels", rows, y.len())));
        }
        let n_batches = self.batches(rows)?;
        let bs = self.batch_size();
        let x = Value::Tensor(x.clone());

        let mut cost = 0.0;
        let mut predictions = Vec::with_capacity(n_batches * bs);
        for k in 0..n_batches {
            let probs = self
                .run_batch(&self.softmax, &x, k)?
                .into_dimensionality::<Ix2>()
                .map_err(|e| ModelError::DataMismatch(e.to_string()))?;
            let labels = y.slice(ndarray::s![k * bs..(k + 1) * bs]);
            cost += sparse_cross_entropy(probs.view(), labels, EPSILON);
            predictions.extend(argmax_rows(probs.view()));
        }
        let evaluated = y.slice(ndarray::s![..n_batches * bs]);
        Ok((error_rate(&predictions, evaluated), cost / n_batches as f32))
    }

    /// Trains with sparse softmax cross-entropy against integer labels `y`.
    pub fn fit_ce(
        &mut self,
        x: &ArrayD<f32>,
        y: &Array1<i32>,
        optimizer: &Rc<dyn Optimizer>,
        config: &FitConfig,
    ) -> ModelResult<TrainHistory> {
        self.model.prepare_training()?;
        let batch_size = self.model.batch_size().unwrap_or_else(|| self.batch_size());
        let labels = match &self.labels {
            Some(labels) => labels.clone(),
            None => {
                let labels = Tensor::new_input(self.model.context(), "labels", vec![batch_size], DType::I32);
                self.labels = Some(labels.clone());
                labels
            }
        };

        let (loss, train_op) = {
            let labels = labels.clone();
            self.ce_loss.minimize(&mut self.model, optimizer, config.global_step.as_ref(), move |model| {
                let logits = &model.training_outputs()?[0];
                Ok(losses::sparse_cross_entropy(logits, &labels)?)
            })?
        };

        let data = vec![
            (self.input().data().node_id, Value::Tensor(x.clone())),
            (labels.node_id, Value::IntTensor(y.clone().into_dyn())),
        ];
        fit_arrays(&mut self.model, &loss, &train_op, data, config, CE_LOSS)
    }
}

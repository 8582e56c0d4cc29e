//! Absolute-difference objective: `mean(|images - out|)`.

use crate::asg::Value;
use crate::losses;
use crate::models::nn_render::NeuralRender;
use crate::models::training::{fit_arrays, fit_generator, FitConfig, TrainHistory};
use crate::models::ModelResult;
use crate::optimizers::Optimizer;
use crate::tensor::Tensor;
use ndarray::ArrayD;
use std::rc::Rc;

pub const ABS_LOSS: &str = "ABS LOSS";

impl NeuralRender {
    fn minimize_abs_loss(&mut self, optimizer: &Rc<dyn Optimizer>, config: &FitConfig) -> ModelResult<(Tensor, Tensor, Tensor)> {
        let targets = self.targets()?;
        let images = targets.images.clone();
        let (loss, train_op) =
            self.abs_loss.minimize(&mut self.model, optimizer, config.global_step.as_ref(), move |model| {
                let out = &model.training_outputs()?[0];
                Ok(targets.with_texture_loss(losses::abs_loss(&targets.images, out)))
            })?;
        Ok((loss, train_op, images))
    }

    /// Trains on paired host arrays of target images and UV maps.
    pub fn fit_abs(
        &mut self,
        images: &ArrayD<f32>,
        uv_maps: &ArrayD<f32>,
        optimizer: &Rc<dyn Optimizer>,
        config: &FitConfig,
    ) -> ModelResult<TrainHistory> {
        self.model.session()?;
        let (loss, train_op, image_node) = self.minimize_abs_loss(optimizer, config)?;
        let data = vec![
            (image_node.node_id, Value::Tensor(images.clone())),
            (self.model.inputs()[0].data().node_id, Value::Tensor(uv_maps.clone())),
        ];
        fit_arrays(&mut self.model, &loss, &train_op, data, config, ABS_LOSS)
    }

    /// Trains for `iterations` generator batches per epoch.
    pub fn gen_fit_abs(
        &mut self,
        optimizer: &Rc<dyn Optimizer>,
        iterations: usize,
        config: &FitConfig,
    ) -> ModelResult<TrainHistory> {
        self.model.session()?;
        self.generator_or_err()?;
        let (loss, train_op, _) = self.minimize_abs_loss(optimizer, config)?;
        fit_generator(&mut self.model, &loss, &train_op, iterations, config, ABS_LOSS)
    }

    pub fn abs_loss_builds(&self) -> usize {
        self.abs_loss.builds()
    }
}

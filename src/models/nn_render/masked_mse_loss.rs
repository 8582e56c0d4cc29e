//! Masked squared error: `sum((images - out)^2 * mask) / sum(mask)`.

use crate::generators::NNRIterator;
use crate::losses;
use crate::models::nn_render::NeuralRender;
use crate::models::training::{fit_generator, FitConfig, TrainHistory};
use crate::models::{ModelError, ModelResult};
use crate::optimizers::Optimizer;
use std::rc::Rc;

pub const MASKED_MSE_LOSS: &str = "MASKED MSE LOSS";

impl NeuralRender {
    /// Trains for `iterations` generator batches per epoch. The mask is the
    /// generator's `bin_mask` element.
    pub fn gen_fit_masked_mse(
        &mut self,
        optimizer: &Rc<dyn Optimizer>,
        iterations: usize,
        config: &FitConfig,
    ) -> ModelResult<TrainHistory> {
        self.model.session()?;
        let mask = self
            .generator_or_err()?
            .get_iterator()
            .remove(NNRIterator::BIN_MASK)
            .ok_or_else(|| ModelError::DataMismatch(format!("generator has no '{}' element", NNRIterator::BIN_MASK)))?;
        let targets = self.targets()?;

        let (loss, train_op) =
            self.masked_mse_loss.minimize(&mut self.model, optimizer, config.global_step.as_ref(), move |model| {
                let out = &model.training_outputs()?[0];
                Ok(targets.with_texture_loss(losses::masked_mse_loss(&targets.images, out, &mask)))
            })?;
        fit_generator(&mut self.model, &loss, &train_op, iterations, config, MASKED_MSE_LOSS)
    }

    pub fn masked_mse_loss_builds(&self) -> usize {
        self.masked_mse_loss.builds()
    }
}

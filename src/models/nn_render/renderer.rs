//! Renderer core: targets, texture loss and inference.

use crate::asg::{DType, Value};
use crate::generators::{Generator, NNRIterator};
use crate::graph::{GraphError, LayerRegistry, MakiTensor};
use crate::models::model::{LossSlot, Model, RestoredGraph};
use crate::models::{ModelError, ModelResult};
use crate::runtime::{Feeds, SessionRef};
use crate::tensor::Tensor;
use ndarray::ArrayD;
use std::path::Path;
use std::rc::Rc;
use tracing::info;

/// `MODEL_INFO` key holding the sampled-texture tensor name.
pub const SAMPLED_TEXTURE: &str = "sampled_texture";

/// Tensors every renderer objective is built from.
#[derive(Debug, Clone)]
pub(super) struct RenderTargets {
    pub images: Tensor,
    /// `mean(|texture[..., :3] - images|)`, already scaled.
    pub texture_loss: Option<Tensor>,
}

impl RenderTargets {
    /// Adds the texture term to `objective`.
    pub fn with_texture_loss(&self, objective: Tensor) -> Tensor {
        match &self.texture_loss {
            Some(texture_loss) => &objective + texture_loss,
            None => objective,
        }
    }
}

/// Renders images from UV maps through a neural texture.
pub struct NeuralRender {
    pub(super) model: Model,
    sampled_texture: MakiTensor,
    generator: Option<Rc<dyn Generator>>,
    rgb_texture_scale: Option<f32>,
    targets: Option<RenderTargets>,
    pub(super) abs_loss: LossSlot,
    pub(super) masked_mse_loss: LossSlot,
}

impl NeuralRender {
    /// `sampled_texture` is the output of the texture layer; it must be part
    /// of the graph of `output`.
    pub fn new(input: MakiTensor, output: MakiTensor, sampled_texture: MakiTensor, name: &str) -> ModelResult<Self> {
        let mut model = Model::new(vec![input], vec![output], name)?;
        match model.tensors().get(sampled_texture.name()) {
            Some(t) if MakiTensor::ptr_eq(t, &sampled_texture) => {}
            _ => return Err(GraphError::UnknownTensor(sampled_texture.name().to_string()).into()),
        }
        model.set_extra_info(SAMPLED_TEXTURE, serde_json::Value::String(sampled_texture.name().to_string()));
        Ok(Self {
            model,
            sampled_texture,
            generator: None,
            rgb_texture_scale: None,
            targets: None,
            abs_loss: LossSlot::new(),
            masked_mse_loss: LossSlot::new(),
        })
    }

    pub fn from_json(path: impl AsRef<Path>) -> ModelResult<Self> {
        Self::from_restored(RestoredGraph::from_json(path, &LayerRegistry::default())?)
    }

    pub fn from_json_str(json: &str) -> ModelResult<Self> {
        Self::from_json_str_with(json, &LayerRegistry::default())
    }

    pub fn from_json_str_with(json: &str, registry: &LayerRegistry) -> ModelResult<Self> {
        Self::from_restored(RestoredGraph::from_json_str(json, registry)?)
    }

    fn from_restored(restored: RestoredGraph) -> ModelResult<Self> {
        let input = restored.tensor(&restored.info.input_mt)?;
        let output = restored.tensor(&restored.info.output_mt)?;
        let sampled_texture = restored.tensor(restored.extra_str(SAMPLED_TEXTURE)?)?;
        info!(model = %restored.info.name, "model is restored");
        Self::new(input, output, sampled_texture, &restored.info.name)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn sampled_texture(&self) -> &MakiTensor {
        &self.sampled_texture
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

    /// Renders a batch of UV maps.
    pub fn predict(&self, uv_maps: &ArrayD<f32>) -> ModelResult<ArrayD<f32>> {
        let mut feeds = Feeds::new();
        feeds.insert(self.model.inputs()[0].data().node_id, Value::Tensor(uv_maps.clone()));
        let output = self.model.outputs()[0].data();
        self.model
            .run(&[output], &feeds)?
            .into_iter()
            .next()
            .and_then(Value::into_tensor)
            .ok_or_else(|| ModelError::DataMismatch("executor returned no float tensor".to_string()))
    }

    /// Pipeline training batches are read from.
    pub fn set_generator(&mut self, generator: Rc<dyn Generator>) -> ModelResult<()> {
        self.ensure_targets_open("set the generator")?;
        self.generator = Some(generator);
        Ok(())
    }

    pub fn generator(&self) -> Option<&Rc<dyn Generator>> {
        self.generator.as_ref()
    }

    /// Forces the first three texture channels towards RGB values.
    ///
    /// Every objective becomes `objective + scale * texture_loss`.
    pub fn set_learn_rgb_texture(&mut self, scale: f32) -> ModelResult<()> {
        self.ensure_targets_open("learn an RGB texture")?;
        self.rgb_texture_scale = Some(scale);
        Ok(())
    }

    fn ensure_targets_open(&self, action: &'static str) -> ModelResult<()> {
        if self.targets.is_some() {
            return Err(ModelError::TrainingFrozen(action));
        }
        Ok(())
    }

    /// Target images and the texture term, created once.
    ///
    /// Images come from the generator when one is set, otherwise from a
    /// placeholder shaped like the output.
    pub(super) fn targets(&mut self) -> ModelResult<RenderTargets> {
        if let Some(targets) = &self.targets {
            return Ok(targets.clone());
        }
        self.model.prepare_training()?;

        let images = match &self.generator {
            Some(generator) => generator.get_iterator().remove(NNRIterator::IMAGE).ok_or_else(|| {
                ModelError::DataMismatch(format!("generator has no '{}' element", NNRIterator::IMAGE))
            })?,
            None => Tensor::new_input(
                self.model.context(),
                "images",
                self.model.outputs()[0].shape().clone(),
                DType::F32,
            ),
        };

        let texture_loss = match self.rgb_texture_scale {
            Some(scale) => {
                let sampled = self.model.training_tensor(self.sampled_texture.name())?;
                let rgb = sampled.slice_last_axis(0, 3)?;
                let loss = (&rgb - &images).abs().mean();
                Some(&loss * &Tensor::scalar(self.model.context(), scale))
            }
            None => None,
        };

        let targets = RenderTargets { images, texture_loss };
        self.targets = Some(targets.clone());
        Ok(targets)
    }

    pub(super) fn generator_or_err(&self) -> ModelResult<&Rc<dyn Generator>> {
        self.generator.as_ref().ok_or(ModelError::GeneratorNotSet)
    }
}

impl std::fmt::Debug for NeuralRender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralRender")
            .field("model", &self.model)
            .field("sampled_texture", &self.sampled_texture.name())
            .field("generator", &self.generator)
            .field("rgb_texture_scale", &self.rgb_texture_scale)
            .finish()
    }
}

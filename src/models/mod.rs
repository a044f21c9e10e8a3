//! Generative models: networks bound together with their configuration, a loss and a
//! persisted form.

mod ae;
mod pixel_cnn;
mod vae;
mod vae_gan;

use std::{fmt::Debug, fs, path::Path};

use log::debug;
use ndarray::{ArrayD, ArrayView2, ArrayViewD};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Serialize, de::DeserializeOwned};

pub use ae::{Ae, AeConfig, AeOutput};
pub use pixel_cnn::{PixelCnn, PixelCnnConfig, PixelCnnOutput};
pub use vae::{ReconstructionLoss, Vae, VaeConfig, VaeOutput};
pub use vae_gan::{VaeGan, VaeGanConfig, VaeGanOutput};

use crate::{
    Result,
    params::{ParamRange, ParamStore},
    persist::{self, MODEL_CONFIG_FILE, MODEL_WEIGHTS_FILE},
};

/// The configuration a model is built from, persisted as `model_config.json`.
pub trait ModelConfig: Serialize + DeserializeOwned + Clone + PartialEq + Debug {
    /// The shape of a single sample, required to size the networks.
    fn input_dim(&self) -> Option<&[usize]>;

    /// Checks every field holds a value the architecture can be built with.
    fn validate(&self) -> Result<()>;
}

/// What a model's forward pass produces.
pub trait ModelOutput {
    /// The scalar the model is trained to minimize.
    fn loss(&self) -> f32;
}

/// A trainable generative model.
///
/// The model owns its parameters in a `ParamStore`. Passes never mutate them: `forward` and
/// `backward` borrow the model immutably and gradients are accumulated into a buffer owned by
/// the caller, which is the only one able to update the weights through `params_mut`.
pub trait GenerativeModel: Sized {
    type Config: ModelConfig;
    type Output: ModelOutput;

    /// The name training runs of this model are namespaced with.
    const NAME: &'static str;

    /// Builds the model, initializing its weights from `rng`.
    ///
    /// # Returns
    /// A configuration error if `config` is invalid or misses a required field.
    fn build<R: Rng + ?Sized>(config: Self::Config, rng: &mut R) -> Result<Self>;

    /// Builds the model with randomly seeded weights.
    fn new(config: Self::Config) -> Result<Self> {
        Self::build(config, &mut StdRng::from_os_rng())
    }

    fn config(&self) -> &Self::Config;

    fn params(&self) -> &ParamStore;

    fn params_mut(&mut self) -> &mut ParamStore;

    /// Runs the model over a batch shaped `(batch, *input_dim)`.
    ///
    /// # Arguments
    /// * `x` - The input batch.
    /// * `rng` - The source of randomness of any sampling step.
    fn forward<R: Rng + ?Sized>(&self, x: ArrayViewD<f32>, rng: &mut R) -> Result<Self::Output>;

    /// Accumulates the gradient of the losses in `output` into `grad`.
    fn backward(&self, output: &Self::Output, grad: &mut [f32]) -> Result<()>;

    /// The parameters an optimizer step must leave untouched after the given forward pass.
    fn frozen(&self, _output: &Self::Output) -> Vec<ParamRange> {
        Vec::new()
    }

    /// Writes `model.pt` and `model_config.json` into `dir`, creating it if needed.
    fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        persist::save_weights(dir, &self.params().state_dict())?;
        persist::write_json(&dir.join(MODEL_CONFIG_FILE), self.config())?;

        debug!("saved {} to {}", Self::NAME, dir.display());
        Ok(())
    }

    /// Rebuilds a model saved with `save`.
    ///
    /// # Returns
    /// A `MissingFile` error naming the missing file, a `MissingKey` error if the weights
    /// aren't stored under the expected keys, or a configuration error if the stored
    /// configuration is invalid.
    fn load_from_folder(dir: &Path) -> Result<Self> {
        let config_path = persist::require_file(dir, MODEL_CONFIG_FILE)?;
        persist::require_file(dir, MODEL_WEIGHTS_FILE)?;

        let config: Self::Config = persist::read_json(&config_path)?;
        config.validate()?;
        let state = persist::load_weights(dir)?;

        // Every weight is overwritten below, the seed doesn't matter.
        let mut model = Self::build(config, &mut StdRng::seed_from_u64(0))?;
        model.params_mut().load_state_dict(&state)?;

        debug!("loaded {} from {}", Self::NAME, dir.display());
        Ok(model)
    }
}

/// A model able to map latent codes back to the data space.
pub trait LatentDecoder {
    fn latent_dim(&self) -> usize;

    /// Decodes `z`, shaped `(batch, latent_dim)`, into samples shaped `(batch, *input_dim)`.
    fn decode(&self, z: ArrayView2<f32>) -> Result<ArrayD<f32>>;
}

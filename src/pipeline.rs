use log::info;
use ndarray::ArrayD;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result,
    dataset::Dataset,
    models::GenerativeModel,
    training::{Trainer, TrainingConfig},
};

/// Trains a model in a single call: builds the datasets, runs the trainer to completion and
/// hands it back for inspection.
#[derive(Debug, Clone)]
pub struct TrainingPipeline<M> {
    model: M,
    training_config: TrainingConfig,
    signature: Option<String>,
}

impl<M: GenerativeModel + Clone> TrainingPipeline<M> {
    /// Creates a new `TrainingPipeline` around an already built model.
    pub fn new(model: M, training_config: TrainingConfig) -> Result<Self> {
        training_config.validate()?;

        Ok(Self {
            model,
            training_config,
            signature: None,
        })
    }

    /// Builds the model from its configuration, seeding its weights with the training seed.
    pub fn from_config(model_config: M::Config, training_config: TrainingConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(training_config.seed);
        let model = M::build(model_config, &mut rng)?;
        Self::new(model, training_config)
    }

    /// Names the run directory after `signature` instead of the current time.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn training_config(&self) -> &TrainingConfig {
        &self.training_config
    }

    /// Trains the model over `train_data`, selecting the best model with `eval_data` if given.
    ///
    /// # Arguments
    /// * `train_data` - Samples shaped `(n, *input_dim)`.
    /// * `eval_data` - Samples shaped `(m, *input_dim)`.
    ///
    /// # Returns
    /// The finished trainer, holding the trained and the best model.
    pub fn run(self, train_data: ArrayD<f32>, eval_data: Option<ArrayD<f32>>) -> Result<Trainer<M>> {
        let train_data = Dataset::new(train_data)?;
        let eval_data = eval_data.map(Dataset::new).transpose()?;

        info!(
            "running {} pipeline over {} samples",
            M::NAME,
            train_data.len()
        );

        let mut trainer = Trainer::new(self.model, self.training_config, train_data, eval_data)?;
        if let Some(signature) = self.signature {
            trainer = trainer.with_signature(signature);
        }

        trainer.train()?;
        Ok(trainer)
    }
}

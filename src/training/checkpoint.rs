use std::path::Path;

use log::debug;

use super::TrainingConfig;
use crate::{Result, models::GenerativeModel, optimization::OptimizerState};

/// A `checkpoint_epoch_{N}` directory read back from disk.
#[derive(Debug, Clone)]
pub struct Checkpoint<M> {
    pub model: M,
    pub optimizer: OptimizerState,
    pub training_config: TrainingConfig,
}

impl<M: GenerativeModel> Checkpoint<M> {
    /// Reads the model, the optimizer state and the training configuration saved in `dir`.
    ///
    /// # Returns
    /// A `MissingFile` error naming the first absent file.
    pub fn load(dir: &Path) -> Result<Self> {
        let model = M::load_from_folder(dir)?;
        let optimizer = OptimizerState::load(dir)?;
        let training_config = TrainingConfig::load(dir)?;

        debug!("loaded checkpoint {}", dir.display());
        Ok(Self {
            model,
            optimizer,
            training_config,
        })
    }
}

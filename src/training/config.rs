use std::{num::NonZeroUsize, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    GenErr, Result,
    optimization::OptimizerConfig,
    persist::{self, TRAINING_CONFIG_FILE},
};

/// Drives a `Trainer`, persisted as `training_config.json` next to every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// The directory training runs are written into.
    pub output_dir: PathBuf,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Save a checkpoint every `steps_saving` epochs, never if absent.
    pub steps_saving: Option<usize>,
    pub seed: u64,
    /// Whether the training set is shuffled before every epoch.
    pub shuffle: bool,
    pub optimizer: OptimizerConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dummy_output_dir"),
            num_epochs: 100,
            batch_size: 100,
            learning_rate: 1e-4,
            steps_saving: None,
            seed: 8,
            shuffle: true,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(GenErr::invalid_config("batch_size", "must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return Err(GenErr::invalid_config(
                "learning_rate",
                format!("must be positive, got {}", self.learning_rate),
            ));
        }
        if self.steps_saving == Some(0) {
            return Err(GenErr::invalid_config("steps_saving", "must be positive"));
        }

        self.optimizer.validate()
    }

    pub(crate) fn batch_size(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| GenErr::invalid_config("batch_size", "must be positive"))
    }

    /// Whether a checkpoint is due at the end of `epoch`.
    pub fn saves_at(&self, epoch: usize) -> bool {
        self.steps_saving.is_some_and(|steps| epoch % steps == 0)
    }

    /// Writes `dir/training_config.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        persist::write_json(&dir.join(TRAINING_CONFIG_FILE), self)
    }

    /// Reads and validates `dir/training_config.json`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = persist::require_file(dir, TRAINING_CONFIG_FILE)?;
        let config: Self = persist::read_json(&path)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn saves_at_multiples_only() {
        let config = TrainingConfig {
            steps_saving: Some(3),
            ..TrainingConfig::default()
        };

        let epochs: Vec<_> = (1..=10).filter(|&e| config.saves_at(e)).collect();
        assert_eq!(epochs, vec![3, 6, 9]);
        assert!(!TrainingConfig::default().saves_at(4));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: TrainingConfig =
            serde_json::from_str(r#"{"num_epochs":3,"optimizer":{"kind":"GradientDescent"}}"#)
                .unwrap();

        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.optimizer, OptimizerConfig::GradientDescent);
    }

    #[test]
    fn invalid_values() {
        for config in [
            TrainingConfig {
                batch_size: 0,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                learning_rate: -1.,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                steps_saving: Some(0),
                ..TrainingConfig::default()
            },
        ] {
            assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            steps_saving: Some(2),
            ..TrainingConfig::new(dir.path())
        };

        config.save(dir.path()).unwrap();
        assert_eq!(TrainingConfig::load(dir.path()).unwrap(), config);
    }
}

//! The training loop: epochs, evaluation, checkpoints and best model selection.

mod checkpoint;
mod config;
mod trainer;

pub use checkpoint::Checkpoint;
pub use config::TrainingConfig;
pub use trainer::{EpochStats, Trainer, TrainerState};

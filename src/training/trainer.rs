use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, info, warn};
use ndarray::ArrayViewD;
use rand::{SeedableRng, rngs::StdRng};

use super::TrainingConfig;
use crate::{
    GenErr, Result,
    dataset::Dataset,
    models::{GenerativeModel, ModelConfig, ModelOutput},
    optimization::{Optimizer, OptimizerState},
    persist::{FINAL_MODEL_DIR, checkpoint_dir_name},
};

/// Where a `Trainer` stands in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Training { epoch: usize },
    Evaluating { epoch: usize },
    Checkpointing { epoch: usize },
    Finished,
}

/// The losses of a finished epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub eval_loss: Option<f32>,
}

/// Trains a model over epochs of mini batches.
///
/// The trainer owns the model, the optimizer and the gradient buffer. Only `train_batch`
/// writes to the weights, evaluation borrows the model immutably.
pub struct Trainer<M: GenerativeModel> {
    model: M,
    config: TrainingConfig,
    optimizer: Box<dyn Optimizer>,
    grad: Vec<f32>,
    train_data: Dataset,
    eval_data: Option<Dataset>,
    rng: StdRng,
    signature: String,
    state: TrainerState,
    best: Option<(f32, M)>,
    history: Vec<EpochStats>,
}

impl<M: GenerativeModel + Clone> Trainer<M> {
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `config` - The training configuration.
    /// * `train_data` - The dataset the model will be trained with.
    /// * `eval_data` - The dataset the best model is selected with, the training set is used
    ///   if absent.
    ///
    /// # Returns
    /// A configuration error if `config` is invalid or a `ShapeMismatch` if the samples don't
    /// have the shape the model was built for.
    pub fn new(
        model: M,
        config: TrainingConfig,
        train_data: Dataset,
        eval_data: Option<Dataset>,
    ) -> Result<Self> {
        config.validate()?;

        for data in std::iter::once(&train_data).chain(&eval_data) {
            check_sample_shape(&model, data)?;
        }

        let len = model.params().len();
        let optimizer = config.optimizer.build(config.learning_rate, len);
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            model,
            optimizer,
            grad: vec![0.; len],
            train_data,
            eval_data,
            rng,
            signature: default_signature(),
            state: TrainerState::Idle,
            best: None,
            history: Vec::new(),
            config,
        })
    }

    /// Replaces the signature the run directory is named after.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Restores the optimizer from a checkpoint, to resume an interrupted run.
    pub fn load_optimizer_state(&mut self, state: &OptimizerState) -> Result<()> {
        self.optimizer.load_state_dict(state)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// The model with the lowest loss seen so far, the current one before any epoch ends.
    pub fn best_model(&self) -> &M {
        self.best.as_ref().map_or(&self.model, |(_, model)| model)
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn history(&self) -> &[EpochStats] {
        &self.history
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// `<output_dir>/<model name>_training_<signature>`.
    pub fn run_dir(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}_training_{}", M::NAME, self.signature))
    }

    pub fn optimizer_state(&self) -> OptimizerState {
        self.optimizer.state_dict()
    }

    /// Performs a single optimization step over `batch`.
    ///
    /// # Returns
    /// The loss of the batch before the update.
    pub fn train_batch(&mut self, batch: ArrayViewD<f32>) -> Result<f32> {
        self.grad.fill(0.);

        let output = self.model.forward(batch, &mut self.rng)?;
        self.model.backward(&output, &mut self.grad)?;

        // Frozen networks neither move nor feed the optimizer's running buffers.
        let frozen = self.model.frozen(&output);
        for range in &frozen {
            range.slice_mut(&mut self.grad).fill(0.);
        }
        let saved: Vec<Vec<f32>> = frozen
            .iter()
            .map(|range| range.slice(self.model.params().values()).to_vec())
            .collect();

        let params = self.model.params_mut().values_mut();
        self.optimizer.update_params(&self.grad, params)?;
        for (range, values) in frozen.iter().zip(saved) {
            range.slice_mut(params).copy_from_slice(&values);
        }

        let loss = output.loss();
        if !loss.is_finite() {
            return Err(GenErr::InvalidData(format!("loss diverged to {loss}")));
        }

        debug!("batch_loss={loss}");
        Ok(loss)
    }

    /// Runs one pass over the training set.
    ///
    /// # Returns
    /// The mean batch loss.
    pub fn train_step(&mut self, epoch: usize) -> Result<f32> {
        self.state = TrainerState::Training { epoch };

        if self.config.shuffle {
            self.train_data.shuffle(&mut self.rng);
        }

        let batch_size = self.config.batch_size()?;
        let batches: Vec<_> = self.train_data.batches(batch_size).collect();

        let mut total = 0.;
        for batch in &batches {
            total += self.train_batch(batch.view())?;
        }

        Ok(total / batches.len().max(1) as f32)
    }

    /// Runs the model over the evaluation set without touching its weights.
    ///
    /// # Returns
    /// The mean batch loss, or `None` without an evaluation set.
    pub fn eval_step(&mut self, epoch: usize) -> Result<Option<f32>> {
        let Some(eval_data) = &self.eval_data else {
            return Ok(None);
        };
        self.state = TrainerState::Evaluating { epoch };

        let batch_size = self.config.batch_size()?;
        let loss = evaluate(&self.model, eval_data, batch_size, &mut self.rng)?;
        Ok(Some(loss))
    }

    /// Writes the current weights, optimizer state and configurations into
    /// `checkpoint_epoch_{epoch}` inside the run directory.
    pub fn save_checkpoint(&mut self, epoch: usize) -> Result<PathBuf> {
        self.state = TrainerState::Checkpointing { epoch };

        let dir = self.run_dir().join(checkpoint_dir_name(epoch));
        self.model.save(&dir)?;
        self.optimizer.state_dict().save(&dir)?;
        self.config.save(&dir)?;

        info!("saved checkpoint epoch={epoch} dir={}", dir.display());
        Ok(dir)
    }

    /// Trains for `num_epochs` epochs then saves the best model under `final_model`.
    ///
    /// # Returns
    /// The directory of the final model.
    pub fn train(&mut self) -> Result<PathBuf> {
        let run_dir = self.run_dir();
        fs::create_dir_all(&run_dir)?;

        info!(
            "training {} for {} epochs into {}",
            M::NAME,
            self.config.num_epochs,
            run_dir.display()
        );
        if self.eval_data.is_none() {
            warn!("no evaluation set given, selecting the best model on the training loss");
        }

        for epoch in 1..=self.config.num_epochs {
            let train_loss = self.train_step(epoch)?;
            let eval_loss = self.eval_step(epoch)?;
            info!("epoch={epoch} train_loss={train_loss} eval_loss={eval_loss:?}");

            let loss = eval_loss.unwrap_or(train_loss);
            if self.best.as_ref().is_none_or(|(best, _)| loss < *best) {
                debug!("new best model epoch={epoch} loss={loss}");
                self.best = Some((loss, self.model.clone()));
            }

            self.history.push(EpochStats {
                epoch,
                train_loss,
                eval_loss,
            });

            if self.config.saves_at(epoch) {
                self.save_checkpoint(epoch)?;
            }
        }

        let final_dir = self.save_final_model(&run_dir)?;
        self.state = TrainerState::Finished;
        Ok(final_dir)
    }

    fn save_final_model(&self, run_dir: &Path) -> Result<PathBuf> {
        let dir = run_dir.join(FINAL_MODEL_DIR);
        self.best_model().save(&dir)?;
        self.config.save(&dir)?;

        info!("saved final model to {}", dir.display());
        Ok(dir)
    }
}

/// The mean batch loss of `model` over `data`.
fn evaluate<M: GenerativeModel>(
    model: &M,
    data: &Dataset,
    batch_size: NonZeroUsize,
    rng: &mut StdRng,
) -> Result<f32> {
    let mut total = 0.;
    let mut batches = 0;

    for batch in data.batches(batch_size) {
        total += model.forward(batch.view(), rng)?.loss();
        batches += 1;
    }

    let loss = total / batches.max(1) as f32;
    if !loss.is_finite() {
        return Err(GenErr::InvalidData(format!(
            "evaluation loss diverged to {loss}"
        )));
    }

    Ok(loss)
}

fn check_sample_shape<M: GenerativeModel>(model: &M, data: &Dataset) -> Result<()> {
    let Some(expected) = model.config().input_dim() else {
        return Ok(());
    };

    let got = data.sample_shape();
    if got != expected {
        return Err(GenErr::ShapeMismatch {
            what: "dataset sample",
            got: got.to_vec(),
            expected: expected.to_vec(),
        });
    }

    Ok(())
}

fn default_signature() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}_{:09}", now.as_secs(), now.subsec_nanos())
}

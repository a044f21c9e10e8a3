use super::OptimizerState;
use crate::{GenErr, Result};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the accumulated gradients.
    ///
    /// # Arguments
    /// * `grad` - A reference to the model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// Snapshots the hyperparameters and internal buffers of the optimizer.
    fn state_dict(&self) -> OptimizerState;

    /// Restores a snapshot taken by `state_dict`.
    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()>;
}

pub(super) fn check_sizes(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(GenErr::ShapeMismatch {
            what: "gradient",
            got: vec![grad.len()],
            expected: vec![params.len()],
        });
    }

    Ok(())
}

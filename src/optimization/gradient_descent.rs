use std::collections::BTreeMap;

use super::{Optimizer, OptimizerState, ParamGroup, optimizer::check_sizes};
use crate::Result;

const KIND: &str = "GradientDescent";

#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
    step: u64,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            step: 0,
        }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;

        let lr = self.learning_rate;

        for (p, g) in params.iter_mut().zip(grad) {
            *p -= lr * g;
        }

        self.step += 1;
        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState {
            kind: KIND.into(),
            step: self.step,
            param_groups: vec![ParamGroup::new(self.learning_rate)],
            state: BTreeMap::new(),
        }
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()> {
        state.expect_kind(KIND)?;
        self.learning_rate = state.group()?.lr;
        self.step = state.step;
        Ok(())
    }
}

use std::collections::BTreeMap;

use super::{Optimizer, OptimizerState, ParamGroup, optimizer::check_sizes};
use crate::Result;

const KIND: &str = "GradientDescentWithMomentum";
const VELOCITY: &str = "momentum_buffer";

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
    step: u64,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
            step: 0,
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(grad, &self.velocity)?;

        let lr = self.learning_rate;
        let mu = self.momentum;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
            });

        self.step += 1;
        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState {
            kind: KIND.into(),
            step: self.step,
            param_groups: vec![ParamGroup {
                momentum: Some(self.momentum),
                ..ParamGroup::new(self.learning_rate)
            }],
            state: BTreeMap::from([(VELOCITY.to_string(), self.velocity.to_vec())]),
        }
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()> {
        state.expect_kind(KIND)?;
        let group = state.group()?;

        state.restore_buffer(VELOCITY, &mut self.velocity)?;
        self.learning_rate = group.lr;
        self.momentum = group.momentum.unwrap_or(self.momentum);
        self.step = state.step;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_accumulates() {
        let mut optimizer = GradientDescentWithMomentum::new(1, 1., 0.5);
        let mut params = [0.];

        optimizer.update_params(&[1.], &mut params).unwrap();
        optimizer.update_params(&[1.], &mut params).unwrap();

        // v1 = 1, v2 = 0.5 + 1
        assert_eq!(params, [-2.5]);
    }

    #[test]
    fn state_restores_velocity() {
        let mut trained = GradientDescentWithMomentum::new(2, 0.1, 0.9);
        let mut params = [0., 0.];
        trained.update_params(&[1., -1.], &mut params).unwrap();

        let mut fresh = GradientDescentWithMomentum::new(2, 0.5, 0.1);
        fresh.load_state_dict(&trained.state_dict()).unwrap();

        assert_eq!(fresh.state_dict(), trained.state_dict());
    }
}

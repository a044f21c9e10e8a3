use std::collections::BTreeMap;

use super::{Optimizer, OptimizerState, ParamGroup, optimizer::check_sizes};
use crate::Result;

const KIND: &str = "Adam";
const EXP_AVG: &str = "exp_avg";
const EXP_AVG_SQ: &str = "exp_avg_sq";

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
    step: u64,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
            step: 0,
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(grad, &self.v)?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;
        self.step += 1;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState {
            kind: KIND.into(),
            step: self.step,
            param_groups: vec![ParamGroup {
                betas: Some((self.beta1, self.beta2)),
                eps: Some(self.epsilon),
                ..ParamGroup::new(self.learning_rate)
            }],
            state: BTreeMap::from([
                (EXP_AVG.to_string(), self.v.to_vec()),
                (EXP_AVG_SQ.to_string(), self.s.to_vec()),
            ]),
        }
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<()> {
        state.expect_kind(KIND)?;
        let group = state.group()?;

        state.restore_buffer(EXP_AVG, &mut self.v)?;
        state.restore_buffer(EXP_AVG_SQ, &mut self.s)?;

        self.learning_rate = group.lr;
        if let Some((b1, b2)) = group.betas {
            self.beta1 = b1;
            self.beta2 = b2;
        }
        if let Some(eps) = group.eps {
            self.epsilon = eps;
        }

        // The bias corrections only depend on how many updates were made.
        let t = i32::try_from(state.step).unwrap_or(i32::MAX);
        self.beta1_t = self.beta1.powi(t);
        self.beta2_t = self.beta2.powi(t);
        self.step = state.step;

        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use super::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer};
use crate::{GenErr, Result};

/// Which optimizer a trainer updates the parameters with. The learning rate comes from the
/// training configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OptimizerConfig {
    Adam { b1: f32, b2: f32, eps: f32 },
    GradientDescent,
    GradientDescentWithMomentum { mu: f32 },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Adam {
            b1: 0.9,
            b2: 0.999,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        match *self {
            OptimizerConfig::Adam { b1, b2, eps } => {
                for beta in [b1, b2] {
                    if !(0.0..1.0).contains(&beta) {
                        return Err(GenErr::invalid_config(
                            "optimizer.betas",
                            format!("must lie in [0, 1), got {beta}"),
                        ));
                    }
                }
                if eps <= 0. {
                    return Err(GenErr::invalid_config("optimizer.eps", "must be positive"));
                }
            }
            OptimizerConfig::GradientDescentWithMomentum { mu } if !(0.0..1.0).contains(&mu) => {
                return Err(GenErr::invalid_config(
                    "optimizer.mu",
                    format!("must lie in [0, 1), got {mu}"),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Builds the optimizer for a model with `len` parameters.
    pub fn build(&self, learning_rate: f32, len: usize) -> Box<dyn Optimizer> {
        match *self {
            OptimizerConfig::Adam { b1, b2, eps } => {
                Box::new(Adam::new(len, learning_rate, b1, b2, eps))
            }
            OptimizerConfig::GradientDescent => Box::new(GradientDescent::new(learning_rate)),
            OptimizerConfig::GradientDescentWithMomentum { mu } => {
                Box::new(GradientDescentWithMomentum::new(len, learning_rate, mu))
            }
        }
    }
}

use ndarray::{Array2, ArrayView2};

use super::LossFn;

/// Squared error loss, summed over the features of a sample and averaged over the batch.
#[derive(Debug, Clone, Copy)]
pub struct Mse {
    scale: f32,
}

impl Default for Mse {
    fn default() -> Self {
        Self::new()
    }
}

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self { scale: 1. }
    }

    /// Returns a new `Mse` multiplying the loss by `scale`.
    pub fn with_scale(scale: f32) -> Self {
        Self { scale }
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let batch = y_pred.nrows().max(1) as f32;
        self.scale * (&y_pred - &y).mapv(|x| x.powi(2)).sum() / batch
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let batch = y_pred.nrows().max(1) as f32;
        (&y_pred - &y) * (2. * self.scale / batch)
    }
}

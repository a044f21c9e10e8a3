use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

const EPS: f32 = 1e-7;

/// Binary cross entropy over probabilities, summed per sample and averaged over the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bce;

impl Bce {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Bce {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let batch = y_pred.nrows().max(1) as f32;
        let total = Zip::from(&y_pred).and(&y).fold(0., |acc, &p, &t| {
            let p = p.clamp(EPS, 1. - EPS);
            acc - (t * p.ln() + (1. - t) * (1. - p).ln())
        });

        total / batch
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let batch = y_pred.nrows().max(1) as f32;
        Zip::from(&y_pred).and(&y).map_collect(|&p, &t| {
            let p = p.clamp(EPS, 1. - EPS);
            (p - t) / (p * (1. - p)) / batch
        })
    }
}

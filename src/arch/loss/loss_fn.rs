use ndarray::{Array2, ArrayView2};

/// A loss over a batch of flattened samples, summed per sample and averaged over the batch.
pub trait LossFn {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}

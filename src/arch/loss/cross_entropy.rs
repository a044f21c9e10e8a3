use ndarray::{Array3, ArrayView2, ArrayView3, Axis};

/// Categorical cross entropy over raw logits.
///
/// Logits are shaped `(batch, classes, positions)` and targets `(batch, positions)`; the loss
/// is summed over positions and averaged over the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub fn new() -> Self {
        Self
    }

    /// Computes the loss together with its gradient w.r.t. the logits.
    pub fn loss_and_grad(
        &self,
        logits: ArrayView3<f32>,
        targets: ArrayView2<usize>,
    ) -> (f32, Array3<f32>) {
        let batch = logits.len_of(Axis(0)).max(1) as f32;
        let mut grad = logits.to_owned();
        let mut loss = 0.;

        for (mut sample, target) in grad.outer_iter_mut().zip(targets.outer_iter()) {
            for (mut column, &t) in sample.axis_iter_mut(Axis(1)).zip(target) {
                let max = column.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                column.mapv_inplace(|v| (v - max).exp());
                let sum = column.sum();
                column.mapv_inplace(|v| v / sum);

                loss -= column[t].max(f32::MIN_POSITIVE).ln();
                column[t] -= 1.;
            }
        }

        grad.mapv_inplace(|g| g / batch);
        (loss / batch, grad)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;

    #[test]
    fn uniform_logits() {
        let logits = Array3::zeros((2, 4, 3));
        let targets = Array2::zeros((2, 3));

        let (loss, grad) = CrossEntropy.loss_and_grad(logits.view(), targets.view());
        assert!((loss - 3. * 4f32.ln()).abs() < 1e-5);
        assert!((grad[[0, 0, 0]] - (0.25 - 1.) / 2.).abs() < 1e-6);
        assert!((grad[[1, 2, 1]] - 0.25 / 2.).abs() < 1e-6);
    }

    #[test]
    fn gradient_sums_to_zero_per_position() {
        let logits = array![[[1., -2.], [0.5, 3.], [2., 0.]]];
        let targets = array![[2, 1]];

        let (_, grad) = CrossEntropy.loss_and_grad(logits.view(), targets.view());
        for column in grad.index_axis(Axis(0), 0).axis_iter(Axis(1)) {
            assert!(column.sum().abs() < 1e-6);
        }
    }
}

use ndarray::{Array3, ArrayViewD};
use rand::Rng;

use super::{HIDDEN, MetricOutput, flatten, require_input_dim};
use crate::{
    Result,
    arch::{Sequential, activations::ActFn, layers::Dense},
    params::ParamStore,
};

/// Produces a lower triangular factor `L` per sample, whose `L·Lᵀ` is a positive definite
/// metric of the latent space.
#[derive(Debug, Clone)]
pub struct MetricMlp {
    features: usize,
    latent_dim: usize,
    layers: Sequential,
    diag: Dense,
    lower: Dense,
}

impl MetricMlp {
    /// Builds the metric network, registering its parameters under `metric.`.
    ///
    /// # Returns
    /// A `MissingConfigField` error if `input_dim` is `None`.
    pub fn new<R: Rng + ?Sized>(
        input_dim: Option<&[usize]>,
        latent_dim: usize,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let input_dim = require_input_dim(input_dim, "metric")?;
        let features = input_dim.iter().product();
        let n_lower = latent_dim * latent_dim.saturating_sub(1) / 2;

        let hidden = Dense::new(
            "metric.layers.0",
            (features, HIDDEN),
            Some(ActFn::relu()),
            store,
            rng,
        )?;
        let diag = Dense::new("metric.diag", (HIDDEN, latent_dim), None, store, rng)?;
        let lower = Dense::new("metric.lower", (HIDDEN, n_lower), None, store, rng)?;

        Ok(Self {
            features,
            latent_dim,
            layers: Sequential::new([hidden]),
            diag,
            lower,
        })
    }

    pub fn forward(&self, params: &[f32], x: ArrayViewD<f32>) -> Result<MetricOutput> {
        let x = flatten(x, self.features, "metric input")?;
        let h = self.layers.forward(params, x, &[])?.output;

        let (diag, _) = self.diag.forward(params, h.clone())?;
        let (lower, _) = self.lower.forward(params, h)?;

        let n = self.latent_dim;
        let mut l = Array3::zeros((diag.nrows(), n, n));

        for ((mut factor, diag), lower) in l.outer_iter_mut().zip(diag.rows()).zip(lower.rows()) {
            let mut entries = lower.iter();
            for i in 0..n {
                for j in 0..i {
                    if let Some(&v) = entries.next() {
                        factor[[i, j]] = v;
                    }
                }
                factor[[i, i]] = diag[i].exp();
            }
        }

        Ok(MetricOutput { l })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{ErrorKind, GenErr};

    #[test]
    fn l_is_lower_triangular_with_positive_diagonal() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut store = ParamStore::new();
        let metric = MetricMlp::new(Some(&[6][..]), 3, &mut store, &mut rng).unwrap();

        let x = ArrayD::from_shape_fn(IxDyn(&[2, 6]), |i| i[1] as f32 * 0.1);
        let l = metric.forward(store.values(), x.view()).unwrap().l;

        assert_eq!(l.dim(), (2, 3, 3));
        for sample in l.outer_iter() {
            for i in 0..3 {
                assert!(sample[[i, i]] > 0.);
                for j in i + 1..3 {
                    assert_eq!(sample[[i, j]], 0.);
                }
            }
        }
    }

    #[test]
    fn requires_input_dim() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut store = ParamStore::new();

        let err = MetricMlp::new(None, 3, &mut store, &mut rng).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(err, GenErr::MissingConfigField { field: "input_dim", .. }));
    }
}

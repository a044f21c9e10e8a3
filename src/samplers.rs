use ndarray::{Array2, ArrayD};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::Rng;

use crate::{GenErr, Result, models::LatentDecoder};

/// Generates new samples by decoding draws of the standard normal prior.
#[derive(Debug, Clone, Copy)]
pub struct NormalSampler<'a, M> {
    model: &'a M,
}

impl<'a, M: LatentDecoder> NormalSampler<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    /// Draws `n` samples shaped `(n, *input_dim)`.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<ArrayD<f32>> {
        if n == 0 {
            return Err(GenErr::InvalidData("cannot draw zero samples".into()));
        }

        let z = Array2::<f32>::random_using((n, self.model.latent_dim()), StandardNormal, rng);
        self.model.decode(z.view())
    }
}

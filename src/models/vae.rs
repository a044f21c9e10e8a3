use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Zip};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    GenerativeModel, LatentDecoder, ModelConfig, ModelOutput,
    ae::{decoded_like, validate_input_dim, validate_latent},
};
use crate::{
    GenErr, Result,
    arch::loss::{Bce, LossFn, Mse},
    nn::{DecoderMlp, DecoderOutput, EncoderOutput, VaeEncoderMlp},
    params::ParamStore,
};

/// How the decoder output is compared with the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionLoss {
    #[default]
    Mse,
    Bce,
}

impl ReconstructionLoss {
    fn loss_fn(self) -> Box<dyn LossFn> {
        match self {
            ReconstructionLoss::Mse => Box::new(Mse::with_scale(0.5)),
            ReconstructionLoss::Bce => Box::new(Bce::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaeConfig {
    pub input_dim: Option<Vec<usize>>,
    pub latent_dim: usize,
    pub reconstruction_loss: ReconstructionLoss,
}

impl Default for VaeConfig {
    fn default() -> Self {
        Self {
            input_dim: None,
            latent_dim: 10,
            reconstruction_loss: ReconstructionLoss::default(),
        }
    }
}

impl VaeConfig {
    pub fn new(input_dim: Vec<usize>, latent_dim: usize) -> Self {
        Self {
            input_dim: Some(input_dim),
            latent_dim,
            ..Self::default()
        }
    }
}

impl ModelConfig for VaeConfig {
    fn input_dim(&self) -> Option<&[usize]> {
        self.input_dim.as_deref()
    }

    fn validate(&self) -> Result<()> {
        validate_latent(self.latent_dim)?;
        validate_input_dim(self.input_dim.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct VaeOutput {
    /// `reconstruction_loss + reg_loss`.
    pub loss: f32,
    pub reconstruction_loss: f32,
    /// The KL divergence between the posterior and the standard normal prior.
    pub reg_loss: f32,
    pub recon_x: ArrayD<f32>,
    pub z: Array2<f32>,
    x: Array2<f32>,
    eps: Array2<f32>,
    encoded: EncoderOutput,
    decoded: DecoderOutput,
}

impl ModelOutput for VaeOutput {
    fn loss(&self) -> f32 {
        self.loss
    }
}

/// A variational autoencoder with a diagonal gaussian posterior and a standard normal prior.
#[derive(Debug, Clone)]
pub struct Vae {
    config: VaeConfig,
    params: ParamStore,
    encoder: VaeEncoderMlp,
    decoder: DecoderMlp,
}

impl Vae {
    /// The posterior mean of every sample of `x`.
    pub fn embed(&self, x: ArrayViewD<f32>) -> Result<Array2<f32>> {
        Ok(self.encoder.forward(self.params.values(), x, &[])?.embedding)
    }

    /// Decodes the posterior mean of every sample of `x`.
    pub fn reconstruct(&self, x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let mu = self.embed(x)?;
        self.decode(mu.view())
    }
}

pub(super) fn posterior_log_var(encoded: &EncoderOutput) -> Result<&Array2<f32>> {
    encoded
        .log_covariance
        .as_ref()
        .ok_or_else(|| GenErr::InvalidData("the encoder produced no log variance".into()))
}

/// Samples `z = μ + ε·exp(½·logσ²)`, returning `z` and `ε`.
pub(super) fn reparameterize<R: Rng + ?Sized>(
    mu: &Array2<f32>,
    log_var: &Array2<f32>,
    rng: &mut R,
) -> (Array2<f32>, Array2<f32>) {
    let eps = Array2::<f32>::random_using(mu.raw_dim(), StandardNormal, rng);
    let z = Zip::from(mu)
        .and(log_var)
        .and(&eps)
        .map_collect(|&mu, &lv, &e| mu + e * (0.5 * lv).exp());

    (z, eps)
}

/// The batch mean of `KL(N(μ, σ²) || N(0, I))`.
pub(super) fn kl_divergence(mu: &Array2<f32>, log_var: &Array2<f32>) -> f32 {
    let batch = mu.nrows().max(1) as f32;
    let total = Zip::from(mu)
        .and(log_var)
        .fold(0., |acc, &mu, &lv| acc - 0.5 * (1. + lv - mu * mu - lv.exp()));

    total / batch
}

/// Chains the delta of `z` through the reparameterization and adds the KL divergence gradient,
/// returning the deltas of `μ` and `logσ²`.
pub(super) fn reparameterization_deltas(
    d_z: &Array2<f32>,
    mu: &Array2<f32>,
    log_var: &Array2<f32>,
    eps: &Array2<f32>,
    kl_scale: f32,
) -> (Array2<f32>, Array2<f32>) {
    let batch = mu.nrows().max(1) as f32;

    let d_mu = Zip::from(d_z)
        .and(mu)
        .map_collect(|&d, &mu| d + kl_scale * mu / batch);

    let d_log_var = Zip::from(d_z)
        .and(log_var)
        .and(eps)
        .map_collect(|&d, &lv, &e| {
            d * e * 0.5 * (0.5 * lv).exp() + kl_scale * 0.5 * (lv.exp() - 1.) / batch
        });

    (d_mu, d_log_var)
}

impl GenerativeModel for Vae {
    type Config = VaeConfig;
    type Output = VaeOutput;

    const NAME: &'static str = "VAE";

    fn build<R: Rng + ?Sized>(config: VaeConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let mut params = ParamStore::new();
        let input_dim = config.input_dim.as_deref();
        let encoder = VaeEncoderMlp::new(input_dim, config.latent_dim, &mut params, rng)?;
        let decoder = DecoderMlp::new(input_dim, config.latent_dim, &mut params, rng)?;

        Ok(Self {
            config,
            params,
            encoder,
            decoder,
        })
    }

    fn config(&self) -> &VaeConfig {
        &self.config
    }

    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    fn forward<R: Rng + ?Sized>(&self, x: ArrayViewD<f32>, rng: &mut R) -> Result<VaeOutput> {
        let params = self.params.values();
        let encoded = self.encoder.forward(params, x.view(), &[])?;
        let mu = &encoded.embedding;
        let log_var = posterior_log_var(&encoded)?;

        let (z, eps) = reparameterize(mu, log_var, rng);
        let decoded = self.decoder.forward(params, z.view(), &[])?;

        let x = decoded_like(x, &decoded)?;
        let reconstruction_loss = self
            .config
            .reconstruction_loss
            .loss_fn()
            .loss(decoded.flat()?, x.view());
        let reg_loss = kl_divergence(mu, log_var);

        Ok(VaeOutput {
            loss: reconstruction_loss + reg_loss,
            reconstruction_loss,
            reg_loss,
            recon_x: decoded.reconstruction.clone(),
            z,
            x,
            eps,
            encoded,
            decoded,
        })
    }

    fn backward(&self, output: &VaeOutput, grad: &mut [f32]) -> Result<()> {
        let params = self.params.values();
        let encoded = &output.encoded;
        let log_var = posterior_log_var(encoded)?;

        let d_recon = self
            .config
            .reconstruction_loss
            .loss_fn()
            .loss_prime(output.decoded.flat()?, output.x.view());
        let d_z = self
            .decoder
            .backward(params, grad, &output.decoded, d_recon)?;

        let (d_mu, d_log_var) =
            reparameterization_deltas(&d_z, &encoded.embedding, log_var, &output.eps, 1.);
        self.encoder
            .backward(params, grad, encoded, d_mu, d_log_var)?;

        Ok(())
    }
}

impl LatentDecoder for Vae {
    fn latent_dim(&self) -> usize {
        self.config.latent_dim
    }

    fn decode(&self, z: ArrayView2<f32>) -> Result<ArrayD<f32>> {
        Ok(self
            .decoder
            .forward(self.params.values(), z, &[])?
            .reconstruction)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, IxDyn, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn model(reconstruction_loss: ReconstructionLoss) -> Vae {
        let config = VaeConfig {
            reconstruction_loss,
            ..VaeConfig::new(vec![6], 2)
        };
        Vae::build(config, &mut StdRng::seed_from_u64(3)).unwrap()
    }

    #[test]
    fn kl_of_the_prior_is_zero() {
        let mu = Array2::zeros((3, 2));
        let log_var = Array2::zeros((3, 2));
        assert_eq!(kl_divergence(&mu, &log_var), 0.);

        let mu = array![[1., 0.]];
        let log_var = Array2::zeros((1, 2));
        assert!((kl_divergence(&mu, &log_var) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn forward_is_deterministic_for_a_seed() {
        let vae = model(ReconstructionLoss::Mse);
        let x = Array::from_elem(IxDyn(&[4, 6]), 0.25);

        let a = vae.forward(x.view(), &mut StdRng::seed_from_u64(9)).unwrap();
        let b = vae.forward(x.view(), &mut StdRng::seed_from_u64(9)).unwrap();

        assert_eq!(a.z, b.z);
        assert_eq!(a.loss, b.loss);
        assert!((a.loss - (a.reconstruction_loss + a.reg_loss)).abs() < 1e-6);
    }

    #[test]
    fn gradient_descends_the_loss() {
        for reconstruction_loss in [ReconstructionLoss::Mse, ReconstructionLoss::Bce] {
            let mut vae = model(reconstruction_loss);
            let x = Array::from_shape_fn(IxDyn(&[3, 6]), |i| ((i[0] + i[1]) % 2) as f32);

            let out = vae.forward(x.view(), &mut StdRng::seed_from_u64(5)).unwrap();
            let mut grad = vec![0.; vae.params().len()];
            vae.backward(&out, &mut grad).unwrap();

            for (p, g) in vae.params_mut().values_mut().iter_mut().zip(&grad) {
                *p -= 1e-3 * g;
            }

            // Same seed, same ε: only the weights changed.
            let after = vae.forward(x.view(), &mut StdRng::seed_from_u64(5)).unwrap();
            assert!(after.loss < out.loss, "{reconstruction_loss:?}");
        }
    }

    #[test]
    fn reconstruction_loss_json() {
        let config: VaeConfig = serde_json::from_str(
            r#"{"input_dim":[3],"latent_dim":2,"reconstruction_loss":"bce"}"#,
        )
        .unwrap();
        assert_eq!(config.reconstruction_loss, ReconstructionLoss::Bce);
    }
}

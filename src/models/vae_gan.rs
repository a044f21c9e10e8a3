use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis, Slice, Zip, concatenate, s};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    GenerativeModel, LatentDecoder, ModelConfig, ModelOutput,
    ae::{validate_input_dim, validate_latent},
    vae::{kl_divergence, posterior_log_var, reparameterization_deltas, reparameterize},
};
use crate::{
    GenErr, Result,
    nn::{
        DecoderMlp, DecoderOutput, DiscriminatorOutput, EncoderOutput, LayeredDiscriminatorMlp,
        VaeEncoderMlp,
    },
    params::{ParamRange, ParamStore},
};

const EPS: f32 = 1e-7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaeGanConfig {
    pub input_dim: Option<Vec<usize>>,
    pub latent_dim: usize,
    /// Weight `β` of the adversarial term in the decoder loss.
    pub adversarial_loss_scale: f32,
    /// The discriminator level whose activations measure reconstruction similarity.
    pub reconstruction_layer: usize,
    pub margin: f32,
    pub equilibrium: f32,
}

impl Default for VaeGanConfig {
    fn default() -> Self {
        Self {
            input_dim: None,
            latent_dim: 10,
            adversarial_loss_scale: 0.5,
            reconstruction_layer: 2,
            margin: 0.4,
            equilibrium: 0.68,
        }
    }
}

impl VaeGanConfig {
    pub fn new(input_dim: Vec<usize>, latent_dim: usize) -> Self {
        Self {
            input_dim: Some(input_dim),
            latent_dim,
            ..Self::default()
        }
    }
}

impl ModelConfig for VaeGanConfig {
    fn input_dim(&self) -> Option<&[usize]> {
        self.input_dim.as_deref()
    }

    fn validate(&self) -> Result<()> {
        validate_latent(self.latent_dim)?;
        validate_input_dim(self.input_dim.as_deref())?;

        if !(0.0..=1.0).contains(&self.adversarial_loss_scale) {
            return Err(GenErr::invalid_config(
                "adversarial_loss_scale",
                format!("must lie in [0, 1], got {}", self.adversarial_loss_scale),
            ));
        }

        let depth = LayeredDiscriminatorMlp::DEPTH;
        if !(1..=depth).contains(&self.reconstruction_layer) {
            return Err(GenErr::invalid_config(
                "reconstruction_layer",
                format!(
                    "must lie in (0, {depth}], got {}",
                    self.reconstruction_layer
                ),
            ));
        }

        if self.margin < 0. || self.equilibrium <= 0. {
            return Err(GenErr::invalid_config(
                "margin",
                "margin must be non negative and equilibrium positive",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VaeGanOutput {
    /// The sum of the encoder, decoder and discriminator losses.
    pub loss: f32,
    pub encoder_loss: f32,
    pub decoder_loss: f32,
    pub discriminator_loss: f32,
    pub recon_x: ArrayD<f32>,
    pub z: Array2<f32>,
    pub update_decoder: bool,
    pub update_discriminator: bool,
    batch: usize,
    eps: Array2<f32>,
    encoded: EncoderOutput,
    /// Decoded `[z; z_prior]`.
    decoded: DecoderOutput,
    /// Scored `[x; recon_x; generated]`.
    scored: DiscriminatorOutput,
}

impl ModelOutput for VaeGanOutput {
    fn loss(&self) -> f32 {
        self.loss
    }
}

/// A VAE whose reconstruction error is measured in the feature space of a discriminator
/// trained to tell real samples from reconstructed and generated ones.
#[derive(Debug, Clone)]
pub struct VaeGan {
    config: VaeGanConfig,
    params: ParamStore,
    encoder: VaeEncoderMlp,
    decoder: DecoderMlp,
    discriminator: LayeredDiscriminatorMlp,
}

impl VaeGan {
    /// The posterior mean of every sample of `x`.
    pub fn embed(&self, x: ArrayViewD<f32>) -> Result<Array2<f32>> {
        Ok(self.encoder.forward(self.params.values(), x, &[])?.embedding)
    }

    /// Decodes the posterior mean of every sample of `x`.
    pub fn reconstruct(&self, x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let mu = self.embed(x)?;
        self.decode(mu.view())
    }

    /// The per-batch gradient of the discriminator loss w.r.t. the scores of
    /// `[x; recon_x; generated]`.
    fn discriminator_deltas(scores: &Array2<f32>, batch: usize) -> Array2<f32> {
        let n = batch as f32;
        let mut d = Array2::zeros(scores.raw_dim());

        for (i, (mut row, p)) in d.rows_mut().into_iter().zip(scores.rows()).enumerate() {
            let p = p[0].clamp(EPS, 1. - EPS);
            row[0] = if i < batch {
                -1. / (p * n)
            } else {
                1. / ((1. - p) * n)
            };
        }

        d
    }

    /// The gradient of the feature loss w.r.t. the level activations of `[x; recon_x; generated]`,
    /// only the reconstructed rows being non zero.
    fn feature_deltas(features: &Array2<f32>, batch: usize) -> Array2<f32> {
        let mut d = Array2::zeros(features.raw_dim());
        let true_rows = features.slice(s![..batch, ..]);
        let recon_rows = features.slice(s![batch..2 * batch, ..]);

        let delta = (&recon_rows - &true_rows) / batch as f32;
        d.slice_mut(s![batch..2 * batch, ..]).assign(&delta);
        d
    }

    fn range(&self, prefix: &str) -> Result<ParamRange> {
        self.params
            .prefix_range(prefix)
            .ok_or_else(|| GenErr::InvalidData(format!("no parameter starts with '{prefix}'")))
    }
}

impl GenerativeModel for VaeGan {
    type Config = VaeGanConfig;
    type Output = VaeGanOutput;

    const NAME: &'static str = "VAEGAN";

    fn build<R: Rng + ?Sized>(config: VaeGanConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let mut params = ParamStore::new();
        let input_dim = config.input_dim.as_deref();
        let encoder = VaeEncoderMlp::new(input_dim, config.latent_dim, &mut params, rng)?;
        let decoder = DecoderMlp::new(input_dim, config.latent_dim, &mut params, rng)?;
        let discriminator = LayeredDiscriminatorMlp::new(input_dim, &mut params, rng)?;

        Ok(Self {
            config,
            params,
            encoder,
            decoder,
            discriminator,
        })
    }

    fn config(&self) -> &VaeGanConfig {
        &self.config
    }

    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    fn forward<R: Rng + ?Sized>(&self, x: ArrayViewD<f32>, rng: &mut R) -> Result<VaeGanOutput> {
        let params = self.params.values();
        let level = self.config.reconstruction_layer;

        let encoded = self.encoder.forward(params, x.view(), &[])?;
        let mu = &encoded.embedding;
        let log_var = posterior_log_var(&encoded)?;
        let batch = mu.nrows();

        let (z, eps) = reparameterize(mu, log_var, rng);
        let z_prior = Array2::<f32>::random_using(z.raw_dim(), StandardNormal, rng);
        let latent = concatenate(Axis(0), &[z.view(), z_prior.view()])?;
        let decoded = self.decoder.forward(params, latent.view(), &[])?;

        let generated = decoded.flat()?;
        let x = x.to_shape((batch, generated.ncols()))?;
        let samples = concatenate(Axis(0), &[x.view(), generated])?;
        let scored = self
            .discriminator
            .forward(params, samples.into_dyn().view(), &[level])?;

        let scores = &scored.adversarial_cost;
        let mean_cost = |rows: Slice, real: bool| {
            let part = scores.slice_axis(Axis(0), rows);
            let total: f32 = part
                .iter()
                .map(|&p| {
                    let p = p.clamp(EPS, 1. - EPS);
                    if real { -p.ln() } else { -(1. - p).ln() }
                })
                .sum();
            total / batch.max(1) as f32
        };

        let original_dis_cost = mean_cost(Slice::from(..batch), true);
        let recon_dis_cost = mean_cost(Slice::from(batch..2 * batch), false);
        let gen_dis_cost = mean_cost(Slice::from(2 * batch..), false);
        let discriminator_loss = original_dis_cost + recon_dis_cost + gen_dis_cost;

        let features = &scored.layers[&level];
        let true_features = features.slice(s![..batch, ..]);
        let recon_features = features.slice(s![batch..2 * batch, ..]);
        let feature_loss = Zip::from(&recon_features)
            .and(&true_features)
            .fold(0., |acc, &r, &t| acc + 0.5 * (r - t).powi(2))
            / batch.max(1) as f32;

        let beta = self.config.adversarial_loss_scale;
        let encoder_loss = kl_divergence(mu, log_var) + feature_loss;
        let decoder_loss = (1. - beta) * feature_loss - beta * discriminator_loss;

        let (low, high) = (
            self.config.equilibrium - self.config.margin,
            self.config.equilibrium + self.config.margin,
        );
        let mut update_discriminator = original_dis_cost >= low && gen_dis_cost >= low;
        let mut update_decoder = original_dis_cost <= high && gen_dis_cost <= high;
        if !update_decoder && !update_discriminator {
            update_decoder = true;
            update_discriminator = true;
        }

        let recon_x = decoded
            .reconstruction
            .slice_axis(Axis(0), Slice::from(..batch))
            .to_owned();

        Ok(VaeGanOutput {
            loss: encoder_loss + decoder_loss + discriminator_loss,
            encoder_loss,
            decoder_loss,
            discriminator_loss,
            recon_x,
            z,
            update_decoder,
            update_discriminator,
            batch,
            eps,
            encoded,
            decoded,
            scored,
        })
    }

    /// Each network receives the gradient of its own loss: the encoder the one of
    /// `encoder_loss`, the decoder the one of `decoder_loss` and the discriminator the one of
    /// `discriminator_loss`.
    fn backward(&self, output: &VaeGanOutput, grad: &mut [f32]) -> Result<()> {
        let params = self.params.values();
        let level = self.config.reconstruction_layer;
        let beta = self.config.adversarial_loss_scale;
        let batch = output.batch;
        let mut scratch = vec![0.; grad.len()];

        let scores = &output.scored.adversarial_cost;
        let d_scores = Self::discriminator_deltas(scores, batch);
        let d_features = Self::feature_deltas(&output.scored.layers[&level], batch);

        // Discriminator.
        self.discriminator.backward(
            params,
            grad,
            &output.scored,
            d_scores.clone(),
            &BTreeMap::new(),
        )?;

        // Decoder, through both the reconstructed and the generated samples.
        let injected = BTreeMap::from([(level, &d_features * (1. - beta))]);
        let d_samples = self.discriminator.backward(
            params,
            &mut scratch,
            &output.scored,
            &d_scores * -beta,
            &injected,
        )?;
        let d_decoded = d_samples.slice(s![batch.., ..]).to_owned();
        self.decoder
            .backward(params, grad, &output.decoded, d_decoded)?;

        // Encoder, through the feature loss of the reconstructions and the KL divergence.
        let injected = BTreeMap::from([(level, d_features)]);
        let d_samples = self.discriminator.backward(
            params,
            &mut scratch,
            &output.scored,
            Array2::zeros(scores.raw_dim()),
            &injected,
        )?;
        let d_decoded = d_samples.slice(s![batch.., ..]).to_owned();
        let d_latent = self
            .decoder
            .backward(params, &mut scratch, &output.decoded, d_decoded)?;
        let d_z = d_latent.slice(s![..batch, ..]).to_owned();

        let encoded = &output.encoded;
        let log_var = posterior_log_var(encoded)?;
        let (d_mu, d_log_var) =
            reparameterization_deltas(&d_z, &encoded.embedding, log_var, &output.eps, 1.);
        self.encoder
            .backward(params, grad, encoded, d_mu, d_log_var)?;

        Ok(())
    }

    fn frozen(&self, output: &VaeGanOutput) -> Vec<ParamRange> {
        let mut frozen = Vec::new();

        if !output.update_decoder {
            frozen.extend(self.range("decoder.").ok());
        }
        if !output.update_discriminator {
            frozen.extend(self.range("discriminator.").ok());
        }

        frozen
    }
}

impl LatentDecoder for VaeGan {
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

use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{GenerativeModel, LatentDecoder, ModelConfig, ModelOutput};
use crate::{
    GenErr, Result,
    arch::loss::{LossFn, Mse},
    nn::{DecoderMlp, DecoderOutput, EncoderMlp, EncoderOutput},
    params::ParamStore,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AeConfig {
    pub input_dim: Option<Vec<usize>>,
    pub latent_dim: usize,
}

impl Default for AeConfig {
    fn default() -> Self {
        Self {
            input_dim: None,
            latent_dim: 10,
        }
    }
}

impl AeConfig {
    pub fn new(input_dim: Vec<usize>, latent_dim: usize) -> Self {
        Self {
            input_dim: Some(input_dim),
            latent_dim,
        }
    }
}

impl ModelConfig for AeConfig {
    fn input_dim(&self) -> Option<&[usize]> {
        self.input_dim.as_deref()
    }

    fn validate(&self) -> Result<()> {
        validate_latent(self.latent_dim)?;
        validate_input_dim(self.input_dim.as_deref())
    }
}

pub(super) fn validate_latent(latent_dim: usize) -> Result<()> {
    if latent_dim == 0 {
        return Err(GenErr::invalid_config("latent_dim", "must be positive"));
    }

    Ok(())
}

/// An absent `input_dim` is only reported when the networks are built.
pub(super) fn validate_input_dim(input_dim: Option<&[usize]>) -> Result<()> {
    match input_dim {
        Some(dim) if dim.is_empty() || dim.contains(&0) => Err(GenErr::invalid_config(
            "input_dim",
            format!("every dimension must be positive, got {dim:?}"),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct AeOutput {
    pub loss: f32,
    pub recon_x: ArrayD<f32>,
    pub z: Array2<f32>,
    x: Array2<f32>,
    encoded: EncoderOutput,
    decoded: DecoderOutput,
}

impl ModelOutput for AeOutput {
    fn loss(&self) -> f32 {
        self.loss
    }
}

/// A vanilla autoencoder trained to reconstruct its input through a bottleneck.
#[derive(Debug, Clone)]
pub struct Ae {
    config: AeConfig,
    params: ParamStore,
    encoder: EncoderMlp,
    decoder: DecoderMlp,
}

impl Ae {
    /// The embedding of every sample of `x`.
    pub fn embed(&self, x: ArrayViewD<f32>) -> Result<Array2<f32>> {
        Ok(self.encoder.forward(self.params.values(), x, &[])?.embedding)
    }

    /// Encodes then decodes `x`.
    pub fn reconstruct(&self, x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let z = self.embed(x)?;
        self.decode(z.view())
    }
}

impl GenerativeModel for Ae {
    type Config = AeConfig;
    type Output = AeOutput;

    const NAME: &'static str = "AE";

    fn build<R: Rng + ?Sized>(config: AeConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let mut params = ParamStore::new();
        let input_dim = config.input_dim.as_deref();
        let encoder = EncoderMlp::new(input_dim, config.latent_dim, &mut params, rng)?;
        let decoder = DecoderMlp::new(input_dim, config.latent_dim, &mut params, rng)?;

        Ok(Self {
            config,
            params,
            encoder,
            decoder,
        })
    }

    fn config(&self) -> &AeConfig {
        &self.config
    }

    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    fn forward<R: Rng + ?Sized>(&self, x: ArrayViewD<f32>, _rng: &mut R) -> Result<AeOutput> {
        let params = self.params.values();
        let encoded = self.encoder.forward(params, x.view(), &[])?;
        let decoded = self.decoder.forward(params, encoded.embedding.view(), &[])?;

        let x = decoded_like(x, &decoded)?;
        let loss = Mse::new().loss(decoded.flat()?, x.view());

        Ok(AeOutput {
            loss,
            recon_x: decoded.reconstruction.clone(),
            z: encoded.embedding.clone(),
            x,
            encoded,
            decoded,
        })
    }

    fn backward(&self, output: &AeOutput, grad: &mut [f32]) -> Result<()> {
        let params = self.params.values();
        let d_recon = Mse::new().loss_prime(output.decoded.flat()?, output.x.view());

        let d_z = self
            .decoder
            .backward(params, grad, &output.decoded, d_recon)?;
        self.encoder.backward(params, grad, &output.encoded, d_z)?;

        Ok(())
    }
}

impl LatentDecoder for Ae {
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

/// Flattens the input batch the same way the reconstruction is flattened.
pub(super) fn decoded_like(x: ArrayViewD<f32>, decoded: &DecoderOutput) -> Result<Array2<f32>> {
    let flat = decoded.flat()?;
    let x = x.to_shape(flat.raw_dim())?;
    Ok(x.into_owned())
}

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayViewD};
use rand::Rng;

use super::{EncoderOutput, EncoderTrace, HIDDEN, flatten, require_input_dim};
use crate::{
    GenErr, Result,
    arch::{Sequential, activations::ActFn, layers::Dense},
    params::ParamStore,
};

/// The body and embedding head shared by both encoders.
#[derive(Debug, Clone)]
struct EncoderCore {
    features: usize,
    body: Sequential,
    embedding: Dense,
}

impl EncoderCore {
    fn new<R: Rng + ?Sized>(
        input_dim: Option<&[usize]>,
        latent_dim: usize,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let input_dim = require_input_dim(input_dim, "encoder")?;
        let features = input_dim.iter().product();

        let hidden = Dense::new(
            "encoder.layers.0",
            (features, HIDDEN),
            Some(ActFn::relu()),
            store,
            rng,
        )?;
        let embedding = Dense::new("encoder.embedding", (HIDDEN, latent_dim), None, store, rng)?;

        Ok(Self {
            features,
            body: Sequential::new([hidden]),
            embedding,
        })
    }

    fn forward(
        &self,
        params: &[f32],
        x: ArrayViewD<f32>,
        levels: &[usize],
        log_var: Option<&Dense>,
    ) -> Result<EncoderOutput> {
        let x = flatten(x, self.features, "encoder input")?;
        let body = self.body.forward(params, x, levels)?;

        let (log_covariance, log_var_cache) = match log_var {
            Some(head) => {
                let (lv, cache) = head.forward(params, body.output.clone())?;
                (Some(lv), Some(cache))
            }
            None => (None, None),
        };
        let (embedding, embedding_cache) = self.embedding.forward(params, body.output)?;

        Ok(EncoderOutput {
            embedding,
            log_covariance,
            layers: body.levels,
            trace: EncoderTrace {
                body: body.trace,
                embedding: embedding_cache,
                log_var: log_var_cache,
            },
        })
    }

    fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        output: &EncoderOutput,
        d_embedding: Array2<f32>,
        d_log_var: Option<(&Dense, Array2<f32>)>,
    ) -> Result<Array2<f32>> {
        let trace = &output.trace;
        let mut d = self
            .embedding
            .backward(params, grad, &trace.embedding, d_embedding)?;

        if let (Some((head, d_lv)), Some(cache)) = (d_log_var, &trace.log_var) {
            d.scaled_add(1., &head.backward(params, grad, cache, d_lv)?);
        }

        self.body
            .backward(params, grad, &trace.body, d, &BTreeMap::new())
    }
}

/// An encoder mapping samples to a deterministic embedding.
#[derive(Debug, Clone)]
pub struct EncoderMlp {
    core: EncoderCore,
}

impl EncoderMlp {
    /// Builds the encoder, registering its parameters under `encoder.`.
    ///
    /// # Returns
    /// A `MissingConfigField` error if `input_dim` is `None`.
    pub fn new<R: Rng + ?Sized>(
        input_dim: Option<&[usize]>,
        latent_dim: usize,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let core = EncoderCore::new(input_dim, latent_dim, store, rng)?;
        Ok(Self { core })
    }

    pub fn depth(&self) -> usize {
        self.core.body.depth()
    }

    /// Embeds the batch `x`, keeping the activations of the given `levels`.
    pub fn forward(
        &self,
        params: &[f32],
        x: ArrayViewD<f32>,
        levels: &[usize],
    ) -> Result<EncoderOutput> {
        self.core.forward(params, x, levels, None)
    }

    /// Accumulates the gradient of the embedding delta into `grad`.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        output: &EncoderOutput,
        d_embedding: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.core.backward(params, grad, output, d_embedding, None)
    }
}

/// An encoder producing the mean and log variance of a diagonal gaussian posterior.
#[derive(Debug, Clone)]
pub struct VaeEncoderMlp {
    core: EncoderCore,
    log_var: Dense,
}

impl VaeEncoderMlp {
    /// Builds the encoder, registering its parameters under `encoder.`.
    ///
    /// # Returns
    /// A `MissingConfigField` error if `input_dim` is `None`.
    pub fn new<R: Rng + ?Sized>(
        input_dim: Option<&[usize]>,
        latent_dim: usize,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let core = EncoderCore::new(input_dim, latent_dim, store, rng)?;
        let log_var = Dense::new("encoder.log_var", (HIDDEN, latent_dim), None, store, rng)?;

        Ok(Self { core, log_var })
    }

    pub fn depth(&self) -> usize {
        self.core.body.depth()
    }

    pub fn forward(
        &self,
        params: &[f32],
        x: ArrayViewD<f32>,
        levels: &[usize],
    ) -> Result<EncoderOutput> {
        self.core.forward(params, x, levels, Some(&self.log_var))
    }

    /// Accumulates the gradients of the mean and log variance deltas into `grad`.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        output: &EncoderOutput,
        d_mu: Array2<f32>,
        d_log_var: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if output.trace.log_var.is_none() {
            return Err(GenErr::InvalidData(
                "the output was not produced by a variational encoder".into(),
            ));
        }

        self.core
            .backward(params, grad, output, d_mu, Some((&self.log_var, d_log_var)))
    }
}

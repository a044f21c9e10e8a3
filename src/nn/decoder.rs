use ndarray::{Array2, ArrayView2, IxDyn};
use rand::Rng;

use super::{DecoderOutput, HIDDEN, require_input_dim};
use crate::{
    GenErr, Result,
    arch::{Sequential, activations::ActFn, layers::Dense},
    params::ParamStore,
};

/// A decoder mapping latent codes back to the data space, squashed into `(0, 1)`.
#[derive(Debug, Clone)]
pub struct DecoderMlp {
    input_dim: Vec<usize>,
    latent_dim: usize,
    layers: Sequential,
}

impl DecoderMlp {
    /// Builds the decoder, registering its parameters under `decoder.`.
    ///
    /// # Returns
    /// A `MissingConfigField` error if `input_dim` is `None`.
    pub fn new<R: Rng + ?Sized>(
        input_dim: Option<&[usize]>,
        latent_dim: usize,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let input_dim = require_input_dim(input_dim, "decoder")?.to_vec();
        let features = input_dim.iter().product();

        let hidden = Dense::new(
            "decoder.layers.0",
            (latent_dim, HIDDEN),
            Some(ActFn::relu()),
            store,
            rng,
        )?;
        let out = Dense::new(
            "decoder.layers.1",
            (HIDDEN, features),
            Some(ActFn::sigmoid(1.)),
            store,
            rng,
        )?;

        Ok(Self {
            input_dim,
            latent_dim,
            layers: Sequential::new([hidden, out]),
        })
    }

    pub fn depth(&self) -> usize {
        self.layers.depth()
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Decodes the latent codes `z`, keeping the activations of the given `levels`.
    pub fn forward(
        &self,
        params: &[f32],
        z: ArrayView2<f32>,
        levels: &[usize],
    ) -> Result<DecoderOutput> {
        if z.ncols() != self.latent_dim {
            return Err(GenErr::ShapeMismatch {
                what: "decoder input",
                got: z.shape().to_vec(),
                expected: vec![z.nrows(), self.latent_dim],
            });
        }

        let out = self.layers.forward(params, z.to_owned(), levels)?;

        let mut shape = vec![z.nrows()];
        shape.extend(&self.input_dim);
        let reconstruction = out.output.into_shape_with_order(IxDyn(&shape))?;

        Ok(DecoderOutput {
            reconstruction,
            layers: out.levels,
            trace: out.trace,
        })
    }

    /// Accumulates the gradient of the flattened reconstruction delta into `grad`.
    ///
    /// # Returns
    /// The delta of the latent codes.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        output: &DecoderOutput,
        d_reconstruction: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.layers.backward(
            params,
            grad,
            &output.trace,
            d_reconstruction,
            &Default::default(),
        )
    }
}

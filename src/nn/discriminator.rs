use std::collections::BTreeMap;

use ndarray::{Array2, ArrayViewD};
use rand::Rng;

use super::{DiscriminatorOutput, HIDDEN, flatten, require_input_dim};
use crate::{
    Result,
    arch::{Sequential, activations::ActFn, layers::Dense},
    params::ParamStore,
};

/// Builds the discriminator stages from `(width, activation)` pairs.
fn stages<R: Rng + ?Sized>(
    features: usize,
    widths: &[(usize, Option<ActFn>)],
    store: &mut ParamStore,
    rng: &mut R,
) -> Result<Sequential> {
    let mut input = features;
    let mut layers = Vec::with_capacity(widths.len());

    for (i, (width, act_fn)) in widths.iter().enumerate() {
        let name = format!("discriminator.layers.{i}");
        layers.push(Dense::new(&name, (input, *width), act_fn.clone(), store, rng)?);
        input = *width;
    }

    Ok(Sequential::new(layers))
}

/// Scores samples with the probability of being real.
#[derive(Debug, Clone)]
pub struct DiscriminatorMlp {
    features: usize,
    layers: Sequential,
}

impl DiscriminatorMlp {
    /// Builds the discriminator, registering its parameters under `discriminator.`.
    pub fn new<R: Rng + ?Sized>(
        input_dim: Option<&[usize]>,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let features = require_input_dim(input_dim, "discriminator")?.iter().product();
        let widths = [(256, Some(ActFn::relu())), (1, Some(ActFn::sigmoid(1.)))];

        Ok(Self {
            features,
            layers: stages(features, &widths, store, rng)?,
        })
    }

    pub fn depth(&self) -> usize {
        self.layers.depth()
    }

    pub fn forward(
        &self,
        params: &[f32],
        x: ArrayViewD<f32>,
        levels: &[usize],
    ) -> Result<DiscriminatorOutput> {
        let x = flatten(x, self.features, "discriminator input")?;
        let out = self.layers.forward(params, x, levels)?;

        Ok(DiscriminatorOutput {
            adversarial_cost: out.output,
            layers: out.levels,
            trace: out.trace,
        })
    }

    /// Accumulates the gradient of the score delta into `grad`.
    ///
    /// # Returns
    /// The delta of the flattened input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        output: &DiscriminatorOutput,
        d_cost: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.layers
            .backward(params, grad, &output.trace, d_cost, &BTreeMap::new())
    }
}

/// A discriminator whose intermediate stages serve as a learned similarity measure.
#[derive(Debug, Clone)]
pub struct LayeredDiscriminatorMlp {
    features: usize,
    layers: Sequential,
}

impl LayeredDiscriminatorMlp {
    pub const DEPTH: usize = 3;

    /// Builds the discriminator, registering its parameters under `discriminator.`.
    pub fn new<R: Rng + ?Sized>(
        input_dim: Option<&[usize]>,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let features = require_input_dim(input_dim, "discriminator")?.iter().product();
        let widths = [
            (HIDDEN, Some(ActFn::relu())),
            (256, None),
            (1, Some(ActFn::sigmoid(1.))),
        ];

        Ok(Self {
            features,
            layers: stages(features, &widths, store, rng)?,
        })
    }

    pub fn depth(&self) -> usize {
        self.layers.depth()
    }

    /// Scores `x` through every stage, keeping the activations of the given `levels`.
    pub fn forward(
        &self,
        params: &[f32],
        x: ArrayViewD<f32>,
        levels: &[usize],
    ) -> Result<DiscriminatorOutput> {
        let x = flatten(x, self.features, "discriminator input")?;
        let out = self.layers.forward(params, x, levels)?;

        Ok(DiscriminatorOutput {
            adversarial_cost: out.output,
            layers: out.levels,
            trace: out.trace,
        })
    }

    /// Runs `x` through the stages up to `stop` included, or all of them if `None`, returning
    /// the last activation computed as `adversarial_cost`.
    pub fn forward_until(
        &self,
        params: &[f32],
        x: ArrayViewD<f32>,
        stop: Option<usize>,
    ) -> Result<DiscriminatorOutput> {
        let x = flatten(x, self.features, "discriminator input")?;
        let stop = stop.unwrap_or(self.depth());
        let out = self.layers.forward_until(params, x, stop, &[])?;

        Ok(DiscriminatorOutput {
            adversarial_cost: out.output,
            layers: out.levels,
            trace: out.trace,
        })
    }

    /// Accumulates into `grad` the gradient of `d_cost`, the delta of the last activation of
    /// `output`, plus the `injected` deltas of intermediate levels.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        output: &DiscriminatorOutput,
        d_cost: Array2<f32>,
        injected: &BTreeMap<usize, Array2<f32>>,
    ) -> Result<Array2<f32>> {
        self.layers
            .backward(params, grad, &output.trace, d_cost, injected)
    }
}

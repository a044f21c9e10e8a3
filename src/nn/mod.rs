//! The default multilayer perceptron networks the models are assembled from.
//!
//! Networks never own their weights: they register them in the model's `ParamStore` and read
//! them back on every pass. Each forward pass returns a typed output carrying a private trace,
//! which the matching backward pass consumes.

mod decoder;
mod discriminator;
mod encoder;
mod metric;

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, ArrayD, ArrayView2, ArrayViewD};

pub use decoder::DecoderMlp;
pub use discriminator::{DiscriminatorMlp, LayeredDiscriminatorMlp};
pub use encoder::{EncoderMlp, VaeEncoderMlp};
pub use metric::MetricMlp;

use crate::{
    GenErr, Result,
    arch::{SequentialTrace, layers::DenseCache},
};

/// Width of the hidden layers of the encoders, decoders and layered discriminator.
pub const HIDDEN: usize = 512;

#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub embedding: Array2<f32>,
    /// Only produced by variational encoders.
    pub log_covariance: Option<Array2<f32>>,
    /// The requested intermediate activations, keyed by level.
    pub layers: BTreeMap<usize, Array2<f32>>,
    trace: EncoderTrace,
}

#[derive(Debug, Clone)]
struct EncoderTrace {
    body: SequentialTrace,
    embedding: DenseCache,
    log_var: Option<DenseCache>,
}

#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// Shaped `(batch, *input_dim)`.
    pub reconstruction: ArrayD<f32>,
    pub layers: BTreeMap<usize, Array2<f32>>,
    trace: SequentialTrace,
}

impl DecoderOutput {
    /// The reconstruction with every sample flattened.
    pub fn flat(&self) -> Result<ArrayView2<'_, f32>> {
        flat_view(self.reconstruction.view())
    }
}

#[derive(Debug, Clone)]
pub struct MetricOutput {
    /// Lower triangular factors, `(batch, latent_dim, latent_dim)`.
    pub l: Array3<f32>,
}

#[derive(Debug, Clone)]
pub struct DiscriminatorOutput {
    /// The probability of each sample being real, `(batch, 1)`, or the activation of the
    /// stage a layered discriminator stopped at.
    pub adversarial_cost: Array2<f32>,
    pub layers: BTreeMap<usize, Array2<f32>>,
    trace: SequentialTrace,
}

/// Checks the shape a network has to be built for was given.
fn require_input_dim<'a>(input_dim: Option<&'a [usize]>, what: &'static str) -> Result<&'a [usize]> {
    input_dim.ok_or(GenErr::MissingConfigField {
        field: "input_dim",
        what,
    })
}

/// Flattens a `(batch, ...)` input into `(batch, features)`.
fn flatten(x: ArrayViewD<f32>, features: usize, what: &'static str) -> Result<Array2<f32>> {
    let batch = x.shape().first().copied().unwrap_or_default();

    if x.ndim() < 2 || x.len() != batch * features {
        return Err(GenErr::ShapeMismatch {
            what,
            got: x.shape().to_vec(),
            expected: vec![batch, features],
        });
    }

    Ok(x.to_shape((batch, features))?.into_owned())
}

fn flat_view(x: ArrayViewD<'_, f32>) -> Result<ArrayView2<'_, f32>> {
    let batch = x.shape().first().copied().unwrap_or_default();
    let features: usize = x.shape().iter().skip(1).product();
    Ok(x.into_shape_with_order((batch, features))?)
}

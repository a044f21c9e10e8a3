use ndarray::{Array3, Array4, Array5, ArrayViewD, Axis, Ix4};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{GenerativeModel, ModelConfig, ModelOutput, ae::validate_input_dim};
use crate::{
    GenErr, Result,
    arch::{
        activations::Relu,
        layers::{Conv2d, Conv2dCache, Mask},
        loss::CrossEntropy,
    },
    params::ParamStore,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelCnnConfig {
    /// `(channels, height, width)` of a sample.
    pub input_dim: Option<Vec<usize>>,
    /// The amount of masked convolutions.
    pub n_layers: usize,
    /// Must be odd so the mask is centered on the current pixel.
    pub kernel_size: usize,
    /// The amount of values a pixel can take, pixels are integers in `[0, n_embeddings)`.
    pub n_embeddings: usize,
    pub hidden_channels: usize,
}

impl Default for PixelCnnConfig {
    fn default() -> Self {
        Self {
            input_dim: None,
            n_layers: 10,
            kernel_size: 5,
            n_embeddings: 256,
            hidden_channels: 64,
        }
    }
}

impl PixelCnnConfig {
    /// Creates a validated configuration with the remaining fields at their defaults.
    pub fn new(input_dim: Vec<usize>, n_layers: usize, kernel_size: usize) -> Result<Self> {
        let config = Self {
            input_dim: Some(input_dim),
            n_layers,
            kernel_size,
            ..Self::default()
        };

        config.validate()?;
        Ok(config)
    }
}

impl ModelConfig for PixelCnnConfig {
    fn input_dim(&self) -> Option<&[usize]> {
        self.input_dim.as_deref()
    }

    fn validate(&self) -> Result<()> {
        validate_input_dim(self.input_dim.as_deref())?;

        if let Some(dim) = &self.input_dim
            && dim.len() != 3
        {
            return Err(GenErr::invalid_config(
                "input_dim",
                format!("expected (channels, height, width), got {dim:?}"),
            ));
        }
        if self.kernel_size % 2 == 0 {
            return Err(GenErr::invalid_config(
                "kernel_size",
                format!("must be odd, got {}", self.kernel_size),
            ));
        }
        if self.n_layers == 0 {
            return Err(GenErr::invalid_config("n_layers", "must be positive"));
        }
        if self.n_embeddings < 2 {
            return Err(GenErr::invalid_config("n_embeddings", "must be at least 2"));
        }
        if self.hidden_channels == 0 {
            return Err(GenErr::invalid_config("hidden_channels", "must be positive"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PixelCnnOutput {
    /// Logits shaped `(batch, n_embeddings, channels, height, width)`.
    pub out: Array5<f32>,
    pub loss: f32,
    trace: Vec<(Conv2dCache, Array4<f32>)>,
    head: Conv2dCache,
    d_logits: Array3<f32>,
}

impl ModelOutput for PixelCnnOutput {
    fn loss(&self) -> f32 {
        self.loss
    }
}

/// An autoregressive model of images: every pixel is a categorical distribution conditioned on
/// the pixels before it in raster order.
#[derive(Debug, Clone)]
pub struct PixelCnn {
    config: PixelCnnConfig,
    params: ParamStore,
    dim: (usize, usize, usize),
    layers: Vec<Conv2d>,
    head: Conv2d,
}

impl PixelCnn {
    /// Checks `x` is a batch of valid pixel values, returning it normalized into `[0, 1]`
    /// together with the integer targets.
    fn prepare(&self, x: ArrayViewD<f32>) -> Result<(Array4<f32>, Array4<usize>)> {
        let (c, h, w) = self.dim;
        let got = x.shape().to_vec();
        let batch = got.first().copied().unwrap_or_default();

        let x = x
            .into_dimensionality::<Ix4>()
            .ok()
            .filter(|x| x.dim() == (batch, c, h, w))
            .ok_or(GenErr::ShapeMismatch {
                what: "pixel cnn input",
                got,
                expected: vec![batch, c, h, w],
            })?;

        let n = self.config.n_embeddings;
        if let Some(v) = x
            .iter()
            .find(|&&v| v.fract() != 0. || v < 0. || v >= n as f32)
        {
            return Err(GenErr::InvalidData(format!(
                "pixel values must be integers in [0, {n}), found {v}"
            )));
        }

        let scale = 1. / (n - 1) as f32;
        Ok((x.mapv(|v| v * scale), x.mapv(|v| v as usize)))
    }
}

impl GenerativeModel for PixelCnn {
    type Config = PixelCnnConfig;
    type Output = PixelCnnOutput;

    const NAME: &'static str = "PixelCNN";

    fn build<R: Rng + ?Sized>(config: PixelCnnConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let &[c, h, w] = config.input_dim.as_deref().ok_or(GenErr::MissingConfigField {
            field: "input_dim",
            what: "pixel cnn",
        })?
        else {
            return Err(GenErr::invalid_config(
                "input_dim",
                "expected (channels, height, width)",
            ));
        };

        let mut params = ParamStore::new();
        let k = config.kernel_size;
        let hidden = config.hidden_channels;

        let mut layers = Vec::with_capacity(config.n_layers);
        layers.push(Conv2d::new("net.0", (c, hidden), k, Some(Mask::A), &mut params, rng)?);
        for i in 1..config.n_layers {
            let name = format!("net.{i}");
            layers.push(Conv2d::new(&name, (hidden, hidden), k, Some(Mask::B), &mut params, rng)?);
        }

        let out_channels = config.n_embeddings * c;
        let head = Conv2d::new("net.head", (hidden, out_channels), 1, None, &mut params, rng)?;

        Ok(Self {
            config,
            params,
            dim: (c, h, w),
            layers,
            head,
        })
    }

    fn config(&self) -> &PixelCnnConfig {
        &self.config
    }

    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    fn forward<R: Rng + ?Sized>(&self, x: ArrayViewD<f32>, _rng: &mut R) -> Result<PixelCnnOutput> {
        let params = self.params.values();
        let (mut a, targets) = self.prepare(x)?;
        let (batch, c, h, w) = targets.dim();
        let n = self.config.n_embeddings;

        let mut trace = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (z, cache) = layer.forward(params, a.view())?;
            a = z.mapv(|z| Relu.f(z));
            trace.push((cache, z));
        }

        let (out, head) = self.head.forward(params, a.view())?;
        let logits = out.into_shape_with_order((batch, n, c * h * w))?;
        let targets = targets.into_shape_with_order((batch, c * h * w))?;

        let (loss, d_logits) = CrossEntropy::new().loss_and_grad(logits.view(), targets.view());
        let out = logits.into_shape_with_order((batch, n, c, h, w))?;

        Ok(PixelCnnOutput {
            out,
            loss,
            trace,
            head,
            d_logits,
        })
    }

    fn backward(&self, output: &PixelCnnOutput, grad: &mut [f32]) -> Result<()> {
        let params = self.params.values();
        let (c, h, w) = self.dim;
        let batch = output.out.len_of(Axis(0));

        let d_out = output
            .d_logits
            .to_shape((batch, self.config.n_embeddings * c, h, w))?;
        let mut d = self.head.backward(params, grad, &output.head, d_out.view())?;

        for (layer, (cache, z)) in self.layers.iter().zip(&output.trace).rev() {
            d.zip_mut_with(z, |d, &z| *d *= Relu.df(z));
            d = layer.backward(params, grad, cache, d.view())?;
        }

        Ok(())
    }
}

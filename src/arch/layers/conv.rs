use ndarray::prelude::*;
use rand::Rng;

use crate::{
    GenErr, Result,
    params::{Init, ParamRange, ParamStore},
};

/// Autoregressive masks for convolution kernels.
///
/// With the kernel centered at the current pixel, every position below the center row and
/// every position right of the center in the center row is hidden. Mask `A` also hides the
/// center itself so the first layer never sees the pixel it predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mask {
    A,
    B,
}

impl Mask {
    fn allows(self, ky: usize, kx: usize, kernel_size: usize) -> bool {
        let center = kernel_size / 2;
        let first_hidden = match self {
            Mask::A => center,
            Mask::B => center + 1,
        };

        ky < center || (ky == center && kx < first_hidden)
    }
}

/// A stride one, zero padded convolution keeping the spatial size of its input.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    w: ParamRange,
    b: ParamRange,
    mask: Option<Array2<f32>>,
}

/// The unfolded input patches of each sample, kept for the backward pass.
#[derive(Debug, Clone)]
pub struct Conv2dCache {
    cols: Vec<Array2<f32>>,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer, registering `{name}.weight` with shape
    /// `(out, in, k, k)` and `{name}.bias` with shape `(out,)`.
    ///
    /// # Returns
    /// An `InvalidConfig` error if `kernel_size` is even.
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        (in_channels, out_channels): (usize, usize),
        kernel_size: usize,
        mask: Option<Mask>,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        if kernel_size % 2 == 0 {
            return Err(GenErr::invalid_config(
                "kernel_size",
                format!("must be odd, got {kernel_size}"),
            ));
        }

        let fan_in = in_channels * kernel_size * kernel_size;
        let init = Init::FanIn { fan_in };
        let shape = [out_channels, in_channels, kernel_size, kernel_size];
        let w = store.register(format!("{name}.weight"), &shape, init, rng)?;
        let b = store.register(format!("{name}.bias"), &[out_channels], init, rng)?;

        let mask = mask.map(|mask| {
            Array2::from_shape_fn((out_channels, fan_in), |(_, j)| {
                let tap = j % (kernel_size * kernel_size);
                let (ky, kx) = (tap / kernel_size, tap % kernel_size);
                if mask.allows(ky, kx, kernel_size) {
                    1.
                } else {
                    0.
                }
            })
        });

        Ok(Self {
            in_channels,
            out_channels,
            kernel_size,
            w,
            b,
            mask,
        })
    }

    pub fn forward(
        &self,
        params: &[f32],
        x: ArrayView4<f32>,
    ) -> Result<(Array4<f32>, Conv2dCache)> {
        let (n, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(GenErr::ShapeMismatch {
                what: "convolution input",
                got: x.shape().to_vec(),
                expected: vec![n, self.in_channels, h, w],
            });
        }

        let weights = self.weight_matrix(params)?;
        let bias = ArrayView1::from_shape(self.out_channels, self.b.slice(params))?;
        let bias = bias.insert_axis(Axis(1));

        let mut out = Array4::zeros((n, self.out_channels, h, w));
        let mut cols = Vec::with_capacity(n);

        for (sample, mut out_sample) in x.outer_iter().zip(out.outer_iter_mut()) {
            let col = im2col(sample, self.kernel_size);
            let y = weights.dot(&col) + &bias;
            out_sample.assign(&y.into_shape_with_order((self.out_channels, h, w))?);
            cols.push(col);
        }

        Ok((out, Conv2dCache { cols }))
    }

    /// Accumulates this layer's gradient into `grad` and returns the delta of its input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        cache: &Conv2dCache,
        d: ArrayView4<f32>,
    ) -> Result<Array4<f32>> {
        let (n, _, h, w) = d.dim();
        let weights = self.weight_matrix(params)?;

        let mut dw = Array2::zeros(weights.dim());
        let mut db = Array1::zeros(self.out_channels);
        let mut dx = Array4::zeros((n, self.in_channels, h, w));

        for ((d_sample, col), mut dx_sample) in
            d.outer_iter().zip(&cache.cols).zip(dx.outer_iter_mut())
        {
            let d_mat = d_sample.to_shape((self.out_channels, h * w))?;
            dw.scaled_add(1., &d_mat.dot(&col.t()));
            db.scaled_add(1., &d_mat.sum_axis(Axis(1)));

            let d_col = weights.t().dot(&d_mat);
            col2im(d_col.view(), self.kernel_size, dx_sample.view_mut());
        }

        if let Some(mask) = &self.mask {
            dw.zip_mut_with(mask, |g, &m| *g *= m);
        }

        let mut grad_w = ArrayViewMut2::from_shape(dw.dim(), self.w.slice_mut(grad))?;
        grad_w.scaled_add(1., &dw);
        let mut grad_b = ArrayViewMut1::from_shape(self.out_channels, self.b.slice_mut(grad))?;
        grad_b.scaled_add(1., &db);

        Ok(dx)
    }

    /// The kernel flattened to `(out, in·k·k)` with the mask applied.
    fn weight_matrix(&self, params: &[f32]) -> Result<Array2<f32>> {
        let fan_in = self.in_channels * self.kernel_size * self.kernel_size;
        let mut weights =
            ArrayView2::from_shape((self.out_channels, fan_in), self.w.slice(params))?.to_owned();

        if let Some(mask) = &self.mask {
            weights.zip_mut_with(mask, |w, &m| *w *= m);
        }

        Ok(weights)
    }
}

/// Unfolds the `k × k` neighbourhood of every pixel into a column, `(c·k·k, h·w)`.
fn im2col(x: ArrayView3<f32>, k: usize) -> Array2<f32> {
    let (c, h, w) = x.dim();
    let pad = k / 2;
    let mut col = Array2::zeros((c * k * k, h * w));

    for ci in 0..c {
        for ky in 0..k {
            for kx in 0..k {
                let row = (ci * k + ky) * k + kx;
                for y in 0..h {
                    let Some(sy) = (y + ky).checked_sub(pad).filter(|&sy| sy < h) else {
                        continue;
                    };
                    for xx in 0..w {
                        let Some(sx) = (xx + kx).checked_sub(pad).filter(|&sx| sx < w) else {
                            continue;
                        };
                        col[[row, y * w + xx]] = x[[ci, sy, sx]];
                    }
                }
            }
        }
    }

    col
}

/// Folds columns back onto the image, summing overlapping contributions.
fn col2im(col: ArrayView2<f32>, k: usize, mut img: ArrayViewMut3<f32>) {
    let (c, h, w) = img.dim();
    let pad = k / 2;

    for ci in 0..c {
        for ky in 0..k {
            for kx in 0..k {
                let row = (ci * k + ky) * k + kx;
                for y in 0..h {
                    let Some(sy) = (y + ky).checked_sub(pad).filter(|&sy| sy < h) else {
                        continue;
                    };
                    for xx in 0..w {
                        let Some(sx) = (xx + kx).checked_sub(pad).filter(|&sx| sx < w) else {
                            continue;
                        };
                        img[[ci, sy, sx]] += col[[row, y * w + xx]];
                    }
                }
            }
        }
    }
}

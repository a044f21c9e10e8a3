use ndarray::prelude::*;
use rand::Rng;

use crate::{
    GenErr, Result,
    arch::activations::ActFn,
    params::{Init, ParamRange, ParamStore},
};

/// A fully connected layer computing `act_fn(x·W + b)`.
///
/// The weights live in a `ParamStore`, the layer only remembers where.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    w: ParamRange,
    b: ParamRange,
}

/// What a `Dense` forward pass leaves behind for the backward pass.
#[derive(Debug, Clone)]
pub struct DenseCache {
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer, registering `{name}.weight` and `{name}.bias`.
    ///
    /// # Arguments
    /// * `name` - The prefix of the layer's parameter names.
    /// * `dim` - The input and output sizes.
    /// * `act_fn` - The activation applied to the output, if any.
    /// * `store` - Where to allocate the parameters.
    /// * `rng` - A random number generator for the initial values.
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        dim: (usize, usize),
        act_fn: Option<ActFn>,
        store: &mut ParamStore,
        rng: &mut R,
    ) -> Result<Self> {
        let init = Init::FanIn { fan_in: dim.0 };
        let w = store.register(format!("{name}.weight"), &[dim.0, dim.1], init, rng)?;
        let b = store.register(format!("{name}.bias"), &[dim.1], init, rng)?;

        Ok(Self { dim, act_fn, w, b })
    }

    pub fn forward(&self, params: &[f32], x: Array2<f32>) -> Result<(Array2<f32>, DenseCache)> {
        if x.ncols() != self.dim.0 {
            return Err(GenErr::ShapeMismatch {
                what: "dense layer input",
                got: x.shape().to_vec(),
                expected: vec![x.nrows(), self.dim.0],
            });
        }

        let (w, b) = self.view_params(params)?;
        let z = x.dot(&w) + &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        Ok((a, DenseCache { x, z }))
    }

    /// Accumulates this layer's gradient into `grad` and returns the delta of its input.
    ///
    /// # Arguments
    /// * `params` - The full parameter buffer.
    /// * `grad` - The full gradient buffer, same length as `params`.
    /// * `cache` - The cache returned by the matching `forward` call.
    /// * `d` - The delta of this layer's output.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        cache: &DenseCache,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&cache.z, |d, &z| *d *= act_fn.df(z));
        }

        let mut dw = ArrayViewMut2::from_shape(self.dim, self.w.slice_mut(grad))?;
        dw.scaled_add(1., &cache.x.t().dot(&d));

        let mut db = ArrayViewMut1::from_shape(self.dim.1, self.b.slice_mut(grad))?;
        db.scaled_add(1., &d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w = ArrayView2::from_shape(self.dim, self.w.slice(params))?;
        let b = ArrayView1::from_shape(self.dim.1, self.b.slice(params))?;
        Ok((w, b))
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn layer(act_fn: Option<ActFn>) -> (Dense, ParamStore) {
        let mut rng = StdRng::seed_from_u64(3);
        let mut store = ParamStore::new();
        let dense = Dense::new("dense", (3, 2), act_fn, &mut store, &mut rng).unwrap();
        (dense, store)
    }

    fn loss(dense: &Dense, params: &[f32], x: &Array2<f32>) -> f32 {
        let (y, _) = dense.forward(params, x.clone()).unwrap();
        y.mapv(|v| v * v).sum() * 0.5
    }

    #[test]
    fn forward_shape() {
        let (dense, store) = layer(Some(ActFn::relu()));
        let x = Array2::ones((4, 3));

        let (y, _) = dense.forward(store.values(), x).unwrap();
        assert_eq!(y.dim(), (4, 2));
        assert!(y.iter().all(|&v| v >= 0.));
    }

    #[test]
    fn wrong_input_width_fails() {
        let (dense, store) = layer(None);
        let x = Array2::ones((4, 5));

        assert!(dense.forward(store.values(), x).is_err());
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (dense, store) = layer(Some(ActFn::sigmoid(1.)));
        let x = array![[0.5, -1.0, 2.0], [1.5, 0.25, -0.75]];
        let params = store.values().to_vec();

        let (y, cache) = dense.forward(&params, x.clone()).unwrap();
        let mut grad = vec![0.; params.len()];
        dense.backward(&params, &mut grad, &cache, y).unwrap();

        let eps = 1e-3;
        for i in 0..params.len() {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;

            let numeric = (loss(&dense, &plus, &x) - loss(&dense, &minus, &x)) / (2. * eps);
            assert!(
                (numeric - grad[i]).abs() < 1e-2,
                "param {i}: numeric {numeric} vs analytic {}",
                grad[i]
            );
        }
    }

    #[test]
    fn backward_accumulates() {
        let (dense, store) = layer(None);
        let params = store.values();
        let x = Array2::ones((2, 3));

        let (y, cache) = dense.forward(params, x).unwrap();
        let mut once = vec![0.; params.len()];
        dense.backward(params, &mut once, &cache, y.clone()).unwrap();

        let mut twice = vec![0.; params.len()];
        dense.backward(params, &mut twice, &cache, y.clone()).unwrap();
        dense.backward(params, &mut twice, &cache, y).unwrap();

        for (a, b) in once.iter().zip(&twice) {
            assert!((2. * a - b).abs() < 1e-5);
        }
    }
}

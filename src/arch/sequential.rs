use std::collections::BTreeMap;

use ndarray::Array2;

use super::layers::{Dense, DenseCache};
use crate::{GenErr, Result};

/// A sequential stack of dense layers: information flows forward when computing an output and
/// backward when computing the *deltas* of its layers.
///
/// Layer levels are counted from one, level `i` being the output of the `i`-th layer.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Dense>,
}

/// The caches of every layer a forward pass went through.
#[derive(Debug, Clone, Default)]
pub struct SequentialTrace {
    caches: Vec<DenseCache>,
}

impl SequentialTrace {
    /// The amount of layers the forward pass went through.
    pub fn depth(&self) -> usize {
        self.caches.len()
    }
}

#[derive(Debug, Clone)]
pub struct SequentialOutput {
    pub output: Array2<f32>,
    /// The requested intermediate activations, keyed by level.
    pub levels: BTreeMap<usize, Array2<f32>>,
    pub trace: SequentialTrace,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Dense>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Checks every level in `levels` lies in `(0, depth]`.
    pub fn validate_levels(levels: &[usize], depth: usize) -> Result<()> {
        match levels.iter().find(|&&level| level == 0 || level > depth) {
            Some(&level) => Err(GenErr::LayerLevelOutOfRange { level, depth }),
            None => Ok(()),
        }
    }

    /// Makes a forward pass through the whole network.
    ///
    /// # Arguments
    /// * `params` - The full parameter buffer.
    /// * `x` - The input data.
    /// * `levels` - The intermediate activations to keep.
    pub fn forward(
        &self,
        params: &[f32],
        x: Array2<f32>,
        levels: &[usize],
    ) -> Result<SequentialOutput> {
        self.forward_until(params, x, self.depth(), levels)
    }

    /// Makes a forward pass stopping right after layer `stop`.
    pub fn forward_until(
        &self,
        params: &[f32],
        mut x: Array2<f32>,
        stop: usize,
        levels: &[usize],
    ) -> Result<SequentialOutput> {
        let depth = self.depth();
        Self::validate_levels(&[stop], depth)?;
        Self::validate_levels(levels, depth)?;

        let mut caches = Vec::with_capacity(stop);
        let mut kept = BTreeMap::new();

        for (i, layer) in self.layers.iter().take(stop).enumerate() {
            let (a, cache) = layer.forward(params, x)?;
            caches.push(cache);

            if levels.contains(&(i + 1)) {
                kept.insert(i + 1, a.clone());
            }
            x = a;
        }

        Ok(SequentialOutput {
            output: x,
            levels: kept,
            trace: SequentialTrace { caches },
        })
    }

    /// Backpropagates `d` through the layers recorded in `trace`, accumulating into `grad`.
    ///
    /// # Arguments
    /// * `params` - The full parameter buffer.
    /// * `grad` - The gradient buffer to accumulate into.
    /// * `trace` - The trace of the matching forward pass.
    /// * `d` - The delta of the last output of the trace.
    /// * `injected` - Extra deltas added to the output of the given levels on the way back.
    ///
    /// # Returns
    /// The delta of the network's input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        trace: &SequentialTrace,
        mut d: Array2<f32>,
        injected: &BTreeMap<usize, Array2<f32>>,
    ) -> Result<Array2<f32>> {
        for (i, (layer, cache)) in self.layers.iter().zip(&trace.caches).enumerate().rev() {
            if let Some(extra) = injected.get(&(i + 1)) {
                d.scaled_add(1., extra);
            }

            d = layer.backward(params, grad, cache, d)?;
        }

        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{ErrorKind, arch::activations::ActFn, params::ParamStore};

    fn network() -> (Sequential, ParamStore) {
        let mut rng = StdRng::seed_from_u64(5);
        let mut store = ParamStore::new();
        let layers = [(4, 6), (6, 3), (3, 2)]
            .into_iter()
            .enumerate()
            .map(|(i, dim)| {
                Dense::new(&format!("l{i}"), dim, Some(ActFn::sigmoid(1.)), &mut store, &mut rng)
            })
            .collect::<Result<Vec<_>>>()
            .unwrap();

        (Sequential::new(layers), store)
    }

    #[test]
    fn keeps_requested_levels() {
        let (net, store) = network();
        let x = Array2::ones((5, 4));

        let out = net.forward(store.values(), x, &[1, 3]).unwrap();
        assert_eq!(out.output.dim(), (5, 2));
        assert_eq!(out.levels.keys().copied().collect::<Vec<_>>(), [1, 3]);
        assert_eq!(out.levels[&1].dim(), (5, 6));
        assert_eq!(out.levels[&3], out.output);
    }

    #[test]
    fn out_of_range_levels_are_rejected() {
        let (net, store) = network();

        for bad in [0, 4] {
            let err = net
                .forward(store.values(), Array2::ones((1, 4)), &[bad])
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn early_exit() {
        let (net, store) = network();

        let out = net
            .forward_until(store.values(), Array2::ones((2, 4)), 2, &[])
            .unwrap();
        assert_eq!(out.output.dim(), (2, 3));
        assert_eq!(out.trace.depth(), 2);
    }

    #[test]
    fn injected_deltas_reach_earlier_layers() {
        let (net, store) = network();
        let params = store.values();
        let out = net
            .forward(params, Array2::ones((2, 4)), &[1])
            .unwrap();

        let zero = Array2::zeros(out.output.dim());
        let mut plain = vec![0.; params.len()];
        net.backward(params, &mut plain, &out.trace, zero.clone(), &BTreeMap::new())
            .unwrap();
        assert!(plain.iter().all(|&g| g == 0.));

        let injected = BTreeMap::from([(1, Array2::ones((2, 6)))]);
        let mut grad = vec![0.; params.len()];
        net.backward(params, &mut grad, &out.trace, zero, &injected)
            .unwrap();

        // Only the first layer, 4·6 weights and 6 biases, receives a gradient.
        assert!(grad[..30].iter().any(|&g| g != 0.));
        assert!(grad[30..].iter().all(|&g| g == 0.));
    }
}

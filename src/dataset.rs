use std::num::NonZeroUsize;

use ndarray::{ArrayD, Axis};
use rand::{Rng, seq::SliceRandom};

use crate::{GenErr, Result};

/// An in-memory dataset, the first axis of `data` indexing the samples.
#[derive(Debug, Clone)]
pub struct Dataset {
    data: ArrayD<f32>,
    order: Vec<usize>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Returns
    /// An `InvalidData` error if `data` has no sample axis or holds no samples.
    pub fn new(data: ArrayD<f32>) -> Result<Self> {
        if data.ndim() < 2 {
            return Err(GenErr::InvalidData(format!(
                "expected data shaped (samples, *input_dim), got {:?}",
                data.shape()
            )));
        }

        let len = data.len_of(Axis(0));
        if len == 0 {
            return Err(GenErr::InvalidData("dataset must be non-empty".into()));
        }

        Ok(Self {
            data,
            order: (0..len).collect(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The shape of a single sample.
    #[inline]
    pub fn sample_shape(&self) -> &[usize] {
        &self.data.shape()[1..]
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Permutes the order in which `batches` yields the samples.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    /// Yields batches shaped `(batch_size, *sample_shape)`, the last one possibly shorter.
    pub fn batches(&self, batch_size: NonZeroUsize) -> impl Iterator<Item = ArrayD<f32>> + '_ {
        self.order
            .chunks(batch_size.get())
            .map(|indices| self.data.select(Axis(0), indices))
    }
}

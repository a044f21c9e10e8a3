use std::collections::BTreeMap;

use ndarray::{ArrayViewD, IxDyn};
use rand::Rng;

use super::Init;
use crate::{GenErr, Result, persist::MODEL_WEIGHTS_FILE};

/// A named copy of every parameter of a model, the unit in which weights are persisted.
pub type StateDict = BTreeMap<String, ParamTensor>;

/// An owned parameter tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Location of a parameter inside the flat parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRange {
    offset: usize,
    len: usize,
}

impl ParamRange {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Views the part of `buf` this range refers to.
    pub fn slice<'a>(&self, buf: &'a [f32]) -> &'a [f32] {
        &buf[self.offset..self.offset + self.len]
    }

    /// Mutably views the part of `buf` this range refers to.
    pub fn slice_mut<'a>(&self, buf: &'a mut [f32]) -> &'a mut [f32] {
        &mut buf[self.offset..self.offset + self.len]
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ParamEntry {
    name: String,
    shape: Vec<usize>,
    range: ParamRange,
}

/// Holds every parameter of a model in a single contiguous buffer.
///
/// Layers never own their weights, they keep the `ParamRange`s handed out by
/// `register` and read them from the buffer on each pass. Gradients live in a
/// buffer of the same length owned by whoever trains the model, so an optimizer
/// can update the whole model with a single slice operation.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    entries: Vec<ParamEntry>,
    values: Vec<f32>,
}

impl ParamStore {
    /// Creates a new empty `ParamStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new parameter to the store.
    ///
    /// # Arguments
    /// * `name` - The unique name the parameter is persisted under.
    /// * `shape` - The shape of the parameter tensor.
    /// * `init` - How to generate the initial values.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// The range of the buffer that holds the new parameter.
    pub fn register<R: Rng + ?Sized>(
        &mut self,
        name: impl Into<String>,
        shape: &[usize],
        init: Init,
        rng: &mut R,
    ) -> Result<ParamRange> {
        let name = name.into();

        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(GenErr::invalid_config(
                "parameter name",
                format!("'{name}' is registered twice"),
            ));
        }

        let len = shape.iter().product();
        let range = ParamRange {
            offset: self.values.len(),
            len,
        };

        self.values.extend(init.sample(len, rng)?);
        self.entries.push(ParamEntry {
            name,
            shape: shape.to_vec(),
            range,
        });

        Ok(range)
    }

    /// Returns the amount of scalar parameters in the store.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Iterates over the parameter names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Views a single parameter by name.
    pub fn get(&self, name: &str) -> Option<ArrayViewD<'_, f32>> {
        let entry = self.entries.iter().find(|entry| entry.name == name)?;
        ArrayViewD::from_shape(IxDyn(&entry.shape), entry.range.slice(&self.values)).ok()
    }

    /// The range covering every parameter whose name starts with `prefix`.
    ///
    /// Parameters of a network are registered one after the other, so the range holds nothing
    /// else as long as networks don't interleave their registrations.
    pub fn prefix_range(&self, prefix: &str) -> Option<ParamRange> {
        let mut matching = self
            .entries
            .iter()
            .filter(|entry| entry.name.starts_with(prefix));

        let first = matching.next()?.range;
        let end = matching
            .map(|entry| entry.range.offset + entry.range.len)
            .fold(first.offset + first.len, usize::max);

        Some(ParamRange {
            offset: first.offset,
            len: end - first.offset,
        })
    }

    /// Copies every parameter out of the store.
    pub fn state_dict(&self) -> StateDict {
        self.entries
            .iter()
            .map(|entry| {
                let tensor = ParamTensor {
                    shape: entry.shape.clone(),
                    data: entry.range.slice(&self.values).to_vec(),
                };

                (entry.name.clone(), tensor)
            })
            .collect()
    }

    /// Overwrites every parameter with the ones in `state`.
    ///
    /// # Returns
    /// A `MissingKey` error naming the first registered parameter absent from `state`,
    /// or a `ShapeMismatch` error if a tensor doesn't match its registered shape.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for entry in &self.entries {
            let tensor = state.get(&entry.name).ok_or_else(|| GenErr::MissingKey {
                file: MODEL_WEIGHTS_FILE,
                key: entry.name.clone(),
            })?;

            if tensor.shape != entry.shape || tensor.data.len() != entry.range.len() {
                return Err(GenErr::ShapeMismatch {
                    what: "parameter tensor",
                    got: tensor.shape.clone(),
                    expected: entry.shape.clone(),
                });
            }
        }

        for entry in &self.entries {
            let tensor = &state[&entry.name];
            entry
                .range
                .slice_mut(&mut self.values)
                .copy_from_slice(&tensor.data);
        }

        Ok(())
    }
}

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    GenErr, Result,
    params::{ParamTensor, StateDict},
    persist::{self, OPTIMIZER_FILE},
};

const STATE_KEY: &str = "state";
const KIND_KEY: &str = "kind";
const STEP_KEY: &str = "step";
const PARAM_GROUPS_KEY: &str = "param_groups";

/// The hyperparameters an optimizer applies to its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub lr: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub betas: Option<(f32, f32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum: Option<f32>,
}

impl ParamGroup {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            betas: None,
            eps: None,
            momentum: None,
        }
    }
}

/// A snapshot of an optimizer: its hyperparameters and its internal buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub kind: String,
    /// The amount of updates performed so far.
    pub step: u64,
    pub param_groups: Vec<ParamGroup>,
    pub state: BTreeMap<String, Vec<f32>>,
}

impl OptimizerState {
    /// Fails unless this snapshot was taken from an optimizer of the given kind.
    pub(super) fn expect_kind(&self, kind: &str) -> Result<()> {
        if self.kind != kind {
            return Err(GenErr::InvalidData(format!(
                "cannot restore a {} optimizer state into {kind}",
                self.kind
            )));
        }

        Ok(())
    }

    /// The first parameter group, every optimizer in the crate keeps exactly one.
    pub(super) fn group(&self) -> Result<&ParamGroup> {
        self.param_groups.first().ok_or_else(|| GenErr::MissingKey {
            file: OPTIMIZER_FILE,
            key: PARAM_GROUPS_KEY.to_string(),
        })
    }

    /// Copies the buffer `name` into `dst`, which must have the same length.
    pub(super) fn restore_buffer(&self, name: &str, dst: &mut [f32]) -> Result<()> {
        let buf = self.state.get(name).ok_or_else(|| GenErr::MissingKey {
            file: OPTIMIZER_FILE,
            key: format!("{STATE_KEY}.{name}"),
        })?;

        if buf.len() != dst.len() {
            return Err(GenErr::ShapeMismatch {
                what: "optimizer buffer",
                got: vec![buf.len()],
                expected: vec![dst.len()],
            });
        }

        dst.copy_from_slice(buf);
        Ok(())
    }

    /// Writes the snapshot to `dir/optimizer.pt`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let tensors: StateDict = self
            .state
            .iter()
            .map(|(name, buf)| {
                let tensor = ParamTensor {
                    shape: vec![buf.len()],
                    data: buf.clone(),
                };
                (name.clone(), tensor)
            })
            .collect();

        let metadata = [
            (KIND_KEY.to_string(), self.kind.clone()),
            (STEP_KEY.to_string(), self.step.to_string()),
            (
                PARAM_GROUPS_KEY.to_string(),
                serde_json::to_string(&self.param_groups)?,
            ),
        ]
        .into_iter()
        .collect();

        persist::write_state_dict(&dir.join(OPTIMIZER_FILE), STATE_KEY, &tensors, Some(metadata))
    }

    /// Reads a snapshot from `dir/optimizer.pt`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = persist::require_file(dir, OPTIMIZER_FILE)?;
        let (tensors, metadata) = persist::read_state_dict(&path, OPTIMIZER_FILE, STATE_KEY)?;

        let field = |key: &'static str| {
            metadata.get(key).ok_or_else(|| GenErr::MissingKey {
                file: OPTIMIZER_FILE,
                key: key.to_string(),
            })
        };

        let kind = field(KIND_KEY)?.clone();
        let step = field(STEP_KEY)?
            .parse()
            .map_err(|e| GenErr::InvalidData(format!("optimizer step: {e}")))?;
        let param_groups = serde_json::from_str(field(PARAM_GROUPS_KEY)?)?;

        let state = tensors
            .into_iter()
            .map(|(name, tensor)| (name, tensor.data))
            .collect();

        Ok(Self {
            kind,
            step,
            param_groups,
            state,
        })
    }
}

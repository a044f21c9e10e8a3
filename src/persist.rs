//! On-disk layout of models, optimizer states and checkpoints.
//!
//! Tensors are stored in safetensors files, configurations as pretty printed JSON.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    GenErr, Result,
    params::{ParamTensor, StateDict},
};

pub const MODEL_WEIGHTS_FILE: &str = "model.pt";
pub const MODEL_CONFIG_FILE: &str = "model_config.json";
pub const OPTIMIZER_FILE: &str = "optimizer.pt";
pub const TRAINING_CONFIG_FILE: &str = "training_config.json";

/// The top-level key every model weight is stored under.
pub const STATE_DICT_KEY: &str = "model_state_dict";

/// The directory holding the best model of a training run.
pub const FINAL_MODEL_DIR: &str = "final_model";

pub fn checkpoint_dir_name(epoch: usize) -> String {
    format!("checkpoint_epoch_{epoch}")
}

/// Returns `dir/file`, failing with `MissingFile` if it isn't a file.
pub fn require_file(dir: &Path, file: &'static str) -> Result<PathBuf> {
    let path = dir.join(file);

    if !path.is_file() {
        return Err(GenErr::MissingFile {
            file,
            dir: dir.to_path_buf(),
        });
    }

    Ok(path)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;

    debug!("wrote {}", path.display());
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Writes every tensor of `state` as `{key}.{name}` into a safetensors file.
///
/// # Arguments
/// * `path` - The file to write.
/// * `key` - The top-level key the tensors are grouped under.
/// * `state` - The tensors to write.
/// * `metadata` - Free form string metadata stored in the file header.
pub fn write_state_dict(
    path: &Path,
    key: &str,
    state: &StateDict,
    metadata: Option<HashMap<String, String>>,
) -> Result<()> {
    let mut views = Vec::with_capacity(state.len());
    for (name, tensor) in state {
        let data: &[u8] = bytemuck::cast_slice(&tensor.data);
        let view = TensorView::new(Dtype::F32, tensor.shape.clone(), data)?;
        views.push((format!("{key}.{name}"), view));
    }

    safetensors::serialize_to_file(views, &metadata, path)?;

    debug!("wrote {} tensors to {}", state.len(), path.display());
    Ok(())
}

/// Reads the tensors stored under `key` in a safetensors file.
///
/// # Arguments
/// * `path` - The file to read.
/// * `file` - The name reported in errors.
/// * `key` - The top-level key the tensors are grouped under.
///
/// # Returns
/// The tensors with `key` stripped from their names, possibly none, and the header metadata.
pub fn read_state_dict(
    path: &Path,
    file: &'static str,
    key: &str,
) -> Result<(StateDict, HashMap<String, String>)> {
    let buf = std::fs::read(path)?;
    let (_, header) = SafeTensors::read_metadata(&buf)?;
    let metadata = header.metadata().clone().unwrap_or_default();
    let tensors = SafeTensors::deserialize(&buf)?;

    let prefix = format!("{key}.");
    let mut state = StateDict::new();

    for (name, view) in tensors.tensors() {
        let Some(name) = name.strip_prefix(&prefix) else {
            continue;
        };

        if view.dtype() != Dtype::F32 {
            return Err(GenErr::InvalidData(format!(
                "tensor '{key}.{name}' in '{file}' is {:?}, expected F32",
                view.dtype()
            )));
        }

        let data = view
            .data()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        let tensor = ParamTensor {
            shape: view.shape().to_vec(),
            data,
        };
        state.insert(name.to_string(), tensor);
    }

    Ok((state, metadata))
}

/// Writes the weights of a model to `dir/model.pt`.
pub fn save_weights(dir: &Path, state: &StateDict) -> Result<()> {
    write_state_dict(&dir.join(MODEL_WEIGHTS_FILE), STATE_DICT_KEY, state, None)
}

/// Reads the weights of a model from `dir/model.pt`.
///
/// # Returns
/// A `MissingFile` error if there's no `model.pt` in `dir`, or a `MissingKey` error if it
/// holds no tensor under `model_state_dict`.
pub fn load_weights(dir: &Path) -> Result<StateDict> {
    let path = require_file(dir, MODEL_WEIGHTS_FILE)?;
    let (state, _) = read_state_dict(&path, MODEL_WEIGHTS_FILE, STATE_DICT_KEY)?;

    if state.is_empty() {
        return Err(GenErr::MissingKey {
            file: MODEL_WEIGHTS_FILE,
            key: STATE_DICT_KEY.to_string(),
        });
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn state() -> StateDict {
        StateDict::from([
            (
                "encoder.weight".to_string(),
                ParamTensor {
                    shape: vec![2, 2],
                    data: vec![1., -2., 3.5, f32::MIN_POSITIVE],
                },
            ),
            (
                "encoder.bias".to_string(),
                ParamTensor {
                    shape: vec![2],
                    data: vec![0.1, 0.2],
                },
            ),
        ])
    }

    #[test]
    fn tensors_are_grouped_under_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MODEL_WEIGHTS_FILE);
        let metadata = HashMap::from([("step".to_string(), "3".to_string())]);

        write_state_dict(&path, STATE_DICT_KEY, &state(), Some(metadata)).unwrap();
        let (read, metadata) = read_state_dict(&path, MODEL_WEIGHTS_FILE, STATE_DICT_KEY).unwrap();

        assert_eq!(read, state());
        assert_eq!(metadata["step"], "3");
    }

    #[test]
    fn other_key_is_a_key_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MODEL_WEIGHTS_FILE);

        write_state_dict(&path, "wrong_model_state_dict", &state(), None).unwrap();
        let (read, _) = read_state_dict(&path, MODEL_WEIGHTS_FILE, STATE_DICT_KEY).unwrap();
        assert!(read.is_empty());

        let err = load_weights(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Key);
    }

    #[test]
    fn weights_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        save_weights(dir.path(), &state()).unwrap();
        assert_eq!(load_weights(dir.path()).unwrap(), state());
    }

    #[test]
    fn require_file_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = require_file(dir.path(), MODEL_CONFIG_FILE).unwrap_err();

        assert!(err.to_string().contains(MODEL_CONFIG_FILE));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn checkpoint_dir() {
        assert_eq!(checkpoint_dir_name(12), "checkpoint_epoch_12");
    }
}

use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, GenErr>;

/// Broad classification of a `GenErr`, useful to react to a family of failures
/// without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    NotFound,
    Key,
    Io,
    Format,
}

/// The crate's error type.
#[derive(Debug)]
pub enum GenErr {
    /// A required configuration field was not provided.
    MissingConfigField {
        field: &'static str,
        what: &'static str,
    },
    /// A configuration field holds a value the architecture can't work with.
    InvalidConfig {
        field: &'static str,
        reason: String,
    },
    /// An intermediate layer was requested outside of `(0, depth]`.
    LayerLevelOutOfRange {
        level: usize,
        depth: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidData(String),
    /// A file that should be part of a persisted directory is absent.
    MissingFile {
        file: &'static str,
        dir: PathBuf,
    },
    /// A persisted file lacks an expected key.
    MissingKey {
        file: &'static str,
        key: String,
    },
    Io(io::Error),
    Json(serde_json::Error),
    SafeTensors(SafeTensorError),
    Shape(ShapeError),
    Rand(String),
}

impl GenErr {
    /// Returns the family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenErr::MissingConfigField { .. } | GenErr::InvalidConfig { .. } => {
                ErrorKind::Configuration
            }
            GenErr::LayerLevelOutOfRange { .. }
            | GenErr::ShapeMismatch { .. }
            | GenErr::InvalidData(_) => ErrorKind::Validation,
            GenErr::MissingFile { .. } => ErrorKind::NotFound,
            GenErr::MissingKey { .. } => ErrorKind::Key,
            GenErr::Io(_) => ErrorKind::Io,
            GenErr::Json(_) | GenErr::SafeTensors(_) | GenErr::Shape(_) | GenErr::Rand(_) => {
                ErrorKind::Format
            }
        }
    }

    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        GenErr::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for GenErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenErr::MissingConfigField { field, what } => write!(
                f,
                "no '{field}' provided, unable to build the {what} automatically"
            ),
            GenErr::InvalidConfig { field, reason } => {
                write!(f, "invalid value for '{field}': {reason}")
            }
            GenErr::LayerLevelOutOfRange { level, depth } => write!(
                f,
                "cannot output layer {level}, levels must lie in (0, {depth}]"
            ),
            GenErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}, got {got:?} and expected {expected:?}"
            ),
            GenErr::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            GenErr::MissingFile { file, dir } => {
                write!(f, "missing '{file}' in {}", dir.display())
            }
            GenErr::MissingKey { file, key } => write!(f, "key '{key}' not found in '{file}'"),
            GenErr::Io(e) => write!(f, "io error: {e}"),
            GenErr::Json(e) => write!(f, "json error: {e}"),
            GenErr::SafeTensors(e) => write!(f, "safetensors error: {e}"),
            GenErr::Shape(e) => write!(f, "shape error: {e}"),
            GenErr::Rand(msg) => write!(f, "random distribution error: {msg}"),
        }
    }
}

impl Error for GenErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GenErr::Io(e) => Some(e),
            GenErr::Json(e) => Some(e),
            GenErr::SafeTensors(e) => Some(e),
            GenErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GenErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for GenErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<SafeTensorError> for GenErr {
    fn from(value: SafeTensorError) -> Self {
        Self::SafeTensors(value)
    }
}

impl From<ShapeError> for GenErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<rand_distr::uniform::Error> for GenErr {
    fn from(value: rand_distr::uniform::Error) -> Self {
        Self::Rand(value.to_string())
    }
}

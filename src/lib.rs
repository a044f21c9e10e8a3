pub mod arch;
pub mod dataset;
pub mod error;
pub mod models;
pub mod nn;
pub mod optimization;
pub mod params;
pub mod persist;
pub mod pipeline;
pub mod samplers;
pub mod training;

pub use error::{ErrorKind, GenErr, Result};

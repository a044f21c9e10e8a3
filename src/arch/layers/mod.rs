mod conv;
mod dense;

pub use conv::{Conv2d, Conv2dCache, Mask};
pub use dense::{Dense, DenseCache};

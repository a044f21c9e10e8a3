mod init;
mod store;

pub use init::Init;
pub use store::{ParamRange, ParamStore, ParamTensor, StateDict};

pub mod buffer;
pub mod gpu;
pub mod kernels;
pub mod pool;

pub use buffer::DeviceBuffer;
pub use gpu::GpuContext;
pub use kernels::*;

pub use gpc_core::{Error, Result};

//! GPU-resident point clouds and the operations over them: construction
//! from RGB-D frames or host arrays, voxel downsampling, radius outlier
//! removal, normal estimation, Euclidean and convexity-bound segmentation.

pub mod cloud;
pub mod segmentation;
pub mod spatial;

pub use cloud::PointCloud;
pub use spatial::GridIndex;

pub use gpc_core::{Error, Result};

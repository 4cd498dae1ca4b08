//! GPU compute kernels, written in WGSL and dispatched through the shared
//! context. Shader sources live next to their host modules; query kernels
//! share the grid-hash helper source by concatenation.

pub mod backproject;
pub mod cluster;
pub mod compact;
pub mod grid;
pub mod icp;
pub mod normals;
pub mod query;
pub mod reduce;
pub mod scan;
pub mod sort;
pub mod transform;
pub mod voxel;

pub const WORKGROUP_SIZE_1D: u32 = 256;

pub fn dispatch_size_1d(count: u32) -> u32 {
    count.div_ceil(WORKGROUP_SIZE_1D)
}

pub use backproject::backproject_frame;
pub use cluster::connected_components;
pub use compact::compact_points;
pub use grid::GpuGrid;
pub use normals::estimate_normals;
pub use query::{nearest_neighbors, neighbor_counts, pairs_within, positions_of, radius_search};
pub use reduce::bounding_box;
pub use transform::transform_cloud;
pub use voxel::voxel_reduce;

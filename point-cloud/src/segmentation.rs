use std::collections::BTreeMap;

use gpc_hal::kernels::{cluster, query};
use gpc_hal::DeviceBuffer;

use crate::cloud::PointCloud;
use crate::{Error, Result};

/// Shared implementation of Euclidean clustering and convexity-bound
/// segmentation: pair graph over the grid hash, GPU connected components,
/// then a host-side size filter and stable renumbering.
pub(crate) fn cluster(
    cloud: &mut PointCloud,
    tol: f32,
    min_size: usize,
    max_size: usize,
    convex: bool,
) -> Result<Vec<Vec<u32>>> {
    if !(tol > 0.0) {
        return Err(Error::invalid_argument(format!(
            "cluster tolerance must be positive, got {}",
            tol
        )));
    }
    if min_size > max_size {
        return Err(Error::invalid_argument(format!(
            "cluster size bounds [{}, {}] are not ordered",
            min_size, max_size
        )));
    }
    if convex && !cloud.has_normals() {
        return Err(Error::MissingNormals(
            "convex segmentation requires previously estimated normals".to_string(),
        ));
    }
    if cloud.is_empty() {
        return Ok(Vec::new());
    }

    let ctx = PointCloud::ctx()?;
    let Some(grid) = cloud.build_grid(tol)? else {
        return Ok(Vec::new());
    };

    let normals = if convex { cloud.normals.as_ref() } else { None };
    let (edges, num_edges) = query::pairs_within(
        ctx,
        &grid,
        &cloud.points,
        cloud.num_points,
        tol,
        normals,
    )?;

    let labels = cluster::connected_components(
        ctx,
        &cloud.points,
        &edges,
        cloud.num_points,
        num_edges,
    )?;

    // Roots are component minima, so ascending root order is exactly the
    // required ascending-smallest-member numbering.
    let mut components: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for (i, &root) in labels.iter().enumerate() {
        if root == cluster::UNASSIGNED {
            continue;
        }
        components.entry(root).or_default().push(i as u32);
    }

    let mut cluster_ids = vec![-1i32; cloud.num_points as usize];
    let mut clusters = Vec::new();
    for (_, members) in components {
        if members.len() < min_size || members.len() > max_size {
            continue;
        }
        let id = clusters.len() as i32;
        for &m in &members {
            cluster_ids[m as usize] = id;
        }
        clusters.push(members);
    }

    cloud.cluster_ids = Some(DeviceBuffer::from_slice(ctx, &cluster_ids)?);
    Ok(clusters)
}

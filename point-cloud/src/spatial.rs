use nalgebra::Point3;

use gpc_core::Aabb;
use gpc_hal::kernels::grid::GpuGrid;
use gpc_hal::kernels::query;
use gpc_hal::DeviceBuffer;

use crate::cloud::PointCloud;
use crate::Result;

/// Grid-hash index over a borrowed cloud. Built per operation and dropped
/// with it; radius queries are valid for radii up to the cell size.
pub struct GridIndex<'a> {
    cloud: &'a PointCloud,
    pub(crate) grid: GpuGrid,
}

impl<'a> GridIndex<'a> {
    pub(crate) fn build(cloud: &'a PointCloud, cell: f32) -> Result<Self> {
        let grid = match cloud.build_grid(cell)? {
            Some(g) => g,
            // No live point: an empty index that answers every query with
            // nothing.
            None => {
                let ctx = PointCloud::ctx()?;
                let unit = Aabb::new(Point3::origin(), Point3::origin());
                GpuGrid::build(
                    ctx,
                    cloud.device_points(),
                    cloud.points_number() as u32,
                    0,
                    &unit,
                    cell,
                )?
            }
        };
        Ok(Self { cloud, grid })
    }

    pub fn cell_size(&self) -> f32 {
        self.grid.cell
    }

    pub fn occupied_cells(&self) -> u32 {
        self.grid.num_cells
    }

    fn upload_queries(&self, queries: &[Point3<f32>]) -> Result<DeviceBuffer<[f32; 4]>> {
        let ctx = PointCloud::ctx()?;
        let raw: Vec<[f32; 4]> = queries.iter().map(|q| [q.x, q.y, q.z, 1.0]).collect();
        DeviceBuffer::from_slice(ctx, &raw)
    }

    /// Point ids and squared distances within `radius` of each query.
    /// Fails with `InvalidArgument` when `radius` exceeds the cell size.
    pub fn radius_search(
        &self,
        queries: &[Point3<f32>],
        radius: f32,
    ) -> Result<Vec<Vec<(u32, f32)>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = PointCloud::ctx()?;
        let query_buf = self.upload_queries(queries)?;
        let hits = query::radius_search(
            ctx,
            &self.grid,
            self.cloud.device_points(),
            &query_buf,
            queries.len() as u32,
            radius,
            false,
        )?;

        let offsets = hits.offsets.read(ctx)?;
        let packed = hits.hits.read(ctx)?;
        let mut out = Vec::with_capacity(queries.len());
        for qi in 0..queries.len() {
            let start = offsets[qi] as usize;
            let end = if qi + 1 < queries.len() {
                offsets[qi + 1] as usize
            } else {
                hits.total as usize
            };
            out.push(
                packed[start..end]
                    .iter()
                    .map(|&[id, d2]| (id, f32::from_bits(d2)))
                    .collect(),
            );
        }
        Ok(out)
    }

    /// Closest point to each query within the 3x3x3 cell neighborhood.
    /// Ties break toward the smaller point id.
    pub fn nearest(&self, queries: &[Point3<f32>]) -> Result<Vec<Option<u32>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = PointCloud::ctx()?;
        let query_buf = self.upload_queries(queries)?;
        let ids = query::nearest_neighbors(
            ctx,
            &self.grid,
            self.cloud.device_points(),
            &query_buf,
            queries.len() as u32,
            f32::MAX,
        )?;
        Ok(ids
            .read(ctx)?
            .into_iter()
            .map(|id| (id >= 0).then_some(id as u32))
            .collect())
    }

    /// All unordered pairs of live points within `radius` of each other.
    pub fn pairs_within(&self, radius: f32) -> Result<Vec<(u32, u32)>> {
        let ctx = PointCloud::ctx()?;
        let (pairs, total) = query::pairs_within(
            ctx,
            &self.grid,
            self.cloud.device_points(),
            self.grid.num_points,
            radius,
            None,
        )?;
        if total == 0 {
            return Ok(Vec::new());
        }
        Ok(pairs
            .read_range(ctx, 0, total as usize)?
            .into_iter()
            .map(|[i, j]| (i, j))
            .collect())
    }
}

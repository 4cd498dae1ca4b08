use std::cell::Cell;

use nalgebra::{Matrix4, Point3, Vector3};
use rayon::prelude::*;

use gpc_core::{Aabb, CameraIntrinsics, GpuPoint, HostPoint, RgbdFrame};
use gpc_hal::kernels::{backproject, compact, grid::GpuGrid, normals, query, transform, voxel};
use gpc_hal::{DeviceBuffer, GpuContext};

use crate::spatial::GridIndex;
use crate::{Error, Result};

/// An unordered point set held in device memory, with optional parallel
/// normal and cluster-id arrays. Each cloud exclusively owns its buffers;
/// filter operations return independent clouds, `transform` and
/// `estimate_normals` mutate in place.
pub struct PointCloud {
    pub(crate) points: DeviceBuffer<GpuPoint>,
    pub(crate) num_points: u32,
    pub(crate) invalid_count: u32,
    pub(crate) normals: Option<DeviceBuffer<[f32; 4]>>,
    pub(crate) cluster_ids: Option<DeviceBuffer<i32>>,
    bbox: Cell<Option<Aabb>>,
    sensor_origin: Point3<f32>,
}

impl PointCloud {
    pub(crate) fn ctx() -> Result<&'static GpuContext> {
        GpuContext::global().ok_or_else(|| Error::device("no GPU device available".to_string()))
    }

    fn from_parts(points: DeviceBuffer<GpuPoint>, num_points: u32, invalid_count: u32) -> Self {
        Self {
            points,
            num_points,
            invalid_count,
            normals: None,
            cluster_ids: None,
            bbox: Cell::new(None),
            sensor_origin: Point3::origin(),
        }
    }

    /// Back-project an RGB-D frame. Every pixel yields one point; pixels
    /// without usable depth in `[z_min, z_max]` become invalid records that
    /// all downstream operations skip.
    pub fn create_from_rgbd(
        depth: &[u16],
        color: &[u8],
        intrinsics: &CameraIntrinsics,
        z_min: f32,
        z_max: f32,
    ) -> Result<Self> {
        let ctx = Self::ctx()?;
        let (points, invalid) =
            backproject::backproject_frame(ctx, depth, color, intrinsics, z_min, z_max)?;
        let n = points.len() as u32;
        Ok(Self::from_parts(points, n, invalid))
    }

    pub fn create_from_frame(frame: &RgbdFrame, z_min: f32, z_max: f32) -> Result<Self> {
        Self::create_from_rgbd(&frame.depth, &frame.color, &frame.intrinsics, z_min, z_max)
    }

    /// Upload a host point array.
    pub fn create_from_host(points: &[HostPoint]) -> Result<Self> {
        let ctx = Self::ctx()?;
        let gpu_points: Vec<GpuPoint> = points.par_iter().map(|&p| GpuPoint::from(p)).collect();
        let invalid = gpu_points.iter().filter(|p| !p.is_valid()).count() as u32;
        let buf = DeviceBuffer::from_slice(ctx, &gpu_points)?;
        Ok(Self::from_parts(buf, points.len() as u32, invalid))
    }

    /// Download the cloud as host interchange records.
    pub fn download(&self) -> Result<Vec<HostPoint>> {
        let ctx = Self::ctx()?;
        let raw = self.points.read(ctx)?;
        Ok(raw.par_iter().map(|&p| HostPoint::from(p)).collect())
    }

    /// Download normals; `None` components are zero vectors for points whose
    /// neighborhood was degenerate.
    pub fn download_normals(&self) -> Result<Vec<Vector3<f32>>> {
        let ctx = Self::ctx()?;
        let normals = self
            .normals
            .as_ref()
            .ok_or_else(|| Error::MissingNormals("cloud carries no normals".to_string()))?;
        let raw = normals.read(ctx)?;
        Ok(raw
            .into_iter()
            .map(|n| Vector3::new(n[0], n[1], n[2]))
            .collect())
    }

    pub fn download_cluster_ids(&self) -> Result<Option<Vec<i32>>> {
        let ctx = Self::ctx()?;
        match &self.cluster_ids {
            Some(ids) => Ok(Some(ids.read(ctx)?)),
            None => Ok(None),
        }
    }

    /// Attach externally produced unit normals (e.g. from a PLY loader).
    pub fn attach_normals(&mut self, normals: &[Vector3<f32>]) -> Result<()> {
        if normals.len() != self.num_points as usize {
            return Err(Error::invalid_argument(format!(
                "{} normals for {} points",
                normals.len(),
                self.num_points
            )));
        }
        let ctx = Self::ctx()?;
        let raw: Vec<[f32; 4]> = normals
            .iter()
            .map(|n| {
                let valid = n.norm_squared() > 0.0;
                [n.x, n.y, n.z, valid as u32 as f32]
            })
            .collect();
        self.normals = Some(DeviceBuffer::from_slice(ctx, &raw)?);
        Ok(())
    }

    pub fn points_number(&self) -> usize {
        self.num_points as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Points that participate in queries (`active` + `inactive`).
    pub fn live_points(&self) -> u32 {
        self.num_points - self.invalid_count
    }

    pub fn invalid_points(&self) -> u32 {
        self.invalid_count
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn sensor_origin(&self) -> Point3<f32> {
        self.sensor_origin
    }

    /// Origin used to disambiguate normal orientation.
    pub fn set_sensor_origin(&mut self, origin: Point3<f32>) {
        self.sensor_origin = origin;
    }

    pub fn device_points(&self) -> &DeviceBuffer<GpuPoint> {
        &self.points
    }

    pub fn device_normals(&self) -> Option<&DeviceBuffer<[f32; 4]>> {
        self.normals.as_ref()
    }

    /// Cached bounding box over the live points; `None` for a cloud with no
    /// live point.
    pub fn get_bbox(&self) -> Result<Option<Aabb>> {
        if let Some(bbox) = self.bbox.get() {
            return Ok(Some(bbox));
        }
        let ctx = Self::ctx()?;
        let bbox = gpc_hal::kernels::reduce::bounding_box(ctx, &self.points, self.num_points)?;
        if let Some(b) = bbox {
            self.bbox.set(Some(b));
        }
        Ok(bbox)
    }

    /// Build a grid-hash index over this cloud with the given cell size.
    pub fn build_index(&self, cell: f32) -> Result<GridIndex<'_>> {
        GridIndex::build(self, cell)
    }

    /// Build the raw grid-hash structure used by the device kernels.
    /// `None` when the cloud has no live point.
    pub fn build_grid(&self, cell: f32) -> Result<Option<GpuGrid>> {
        let ctx = Self::ctx()?;
        let Some(bbox) = self.get_bbox()? else {
            return Ok(None);
        };
        Ok(Some(GpuGrid::build(
            ctx,
            &self.points,
            self.num_points,
            self.live_points(),
            &bbox,
            cell,
        )?))
    }

    fn empty() -> Result<Self> {
        let ctx = Self::ctx()?;
        Ok(Self::from_parts(DeviceBuffer::alloc(ctx, 0)?, 0, 0))
    }

    /// Rigid transform in place. Stored normals are rotated; the bounding
    /// box cache is invalidated; cluster ids survive.
    pub fn transform(&mut self, t: &Matrix4<f32>) -> Result<()> {
        let ctx = Self::ctx()?;
        transform::transform_cloud(ctx, &self.points, self.normals.as_ref(), self.num_points, t)?;
        self.bbox.set(None);
        Ok(())
    }

    /// One output point per occupied voxel, at the mean position and colour
    /// of its contributors. The input is unchanged; output ordering follows
    /// ascending voxel key and is reproducible.
    pub fn voxel_grid_down_sample(&self, leaf: f32) -> Result<PointCloud> {
        if !(leaf > 0.0) {
            return Err(Error::invalid_argument(format!(
                "voxel leaf size must be positive, got {}",
                leaf
            )));
        }
        let ctx = Self::ctx()?;
        let Some(grid) = self.build_grid(leaf)? else {
            return Self::empty();
        };
        let out = voxel::voxel_reduce(ctx, &grid, &self.points)?;
        let n = grid.num_cells;
        Ok(Self::from_parts(out, n, 0))
    }

    /// Keep points with at least `min_neighbors` other live points within
    /// `radius`. Survivors preserve their input order; invalid points are
    /// dropped.
    pub fn radius_outlier_removal(&self, radius: f32, min_neighbors: u32) -> Result<PointCloud> {
        if !(radius > 0.0) {
            return Err(Error::invalid_argument(format!(
                "outlier radius must be positive, got {}",
                radius
            )));
        }
        let ctx = Self::ctx()?;
        let Some(grid) = self.build_grid(radius)? else {
            return Self::empty();
        };
        let queries = query::positions_of(ctx, &self.points, self.num_points)?;
        let counts = query::neighbor_counts(
            ctx,
            &grid,
            &self.points,
            &queries,
            self.num_points,
            radius,
            true,
        )?;
        let out = compact::compact_points(ctx, &self.points, &counts, self.num_points, min_neighbors)?;
        let n = out.len() as u32;
        Ok(Self::from_parts(out, n, 0))
    }

    /// Attach a unit normal to every live point, estimated from the
    /// covariance of its `radius` neighborhood and oriented toward the
    /// sensor origin. Points with under 3 neighbors or a degenerate
    /// neighborhood get a zero normal and become invalid.
    pub fn estimate_normals(&mut self, radius: f32) -> Result<()> {
        if !(radius > 0.0) {
            return Err(Error::invalid_argument(format!(
                "normal estimation radius must be positive, got {}",
                radius
            )));
        }
        let ctx = Self::ctx()?;
        let Some(grid) = self.build_grid(radius)? else {
            self.normals = None;
            return Ok(());
        };
        let (normals, demoted) = normals::estimate_normals(
            ctx,
            &grid,
            &self.points,
            self.num_points,
            radius,
            self.sensor_origin,
        )?;
        self.normals = Some(normals);
        self.invalid_count += demoted;
        if demoted > 0 {
            self.bbox.set(None);
        }
        Ok(())
    }

    /// Connected components over paths of step length `tol`, keeping
    /// clusters whose size lies in `[min_size, max_size]`.
    pub fn euclidean_clustering(
        &mut self,
        tol: f32,
        min_size: usize,
        max_size: usize,
    ) -> Result<Vec<Vec<u32>>> {
        crate::segmentation::cluster(self, tol, min_size, max_size, false)
    }

    /// Clustering constrained to locally convex joins; requires previously
    /// computed normals.
    pub fn convex_obj_segmentation(
        &mut self,
        tol: f32,
        min_size: usize,
        max_size: usize,
    ) -> Result<Vec<Vec<u32>>> {
        crate::segmentation::cluster(self, tol, min_size, max_size, true)
    }
}

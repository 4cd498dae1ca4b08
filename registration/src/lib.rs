//! Color ICP: joint point-to-plane and photometric registration of two
//! GPU-resident clouds, solved by Gauss-Newton over se(3).

pub mod se3;

use nalgebra::Matrix4;

use gpc_hal::kernels::icp;
use gpc_point_cloud::PointCloud;

pub use gpc_core::{Error, Result};

/// Weight of the photometric residual in the joint objective
/// `(1 - sigma) * rG^2 + sigma * rC^2`, the standard color-ICP weighting.
pub const COLOR_WEIGHT_SIGMA: f32 = 0.968;

/// Minimum correspondences for a solvable 6-DOF system.
const MIN_CORRESPONDENCES: u32 = 6;

/// Gauss-Newton systems with a worse condition number than this are
/// rejected as singular.
const MAX_CONDITION_NUMBER: f32 = 1e8;

const TRANSLATION_EPS: f32 = 1e-6;
const RMSE_EPS: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpState {
    Uninitialized,
    Ready,
    Aligned,
    Failed,
}

/// Color ICP aligner. Borrow the source and target for the duration of the
/// registration; `align()` is legal once both are set, accessors once it
/// succeeded.
pub struct ColorIcp<'a> {
    max_iterations: usize,
    max_correspondence_distance: f32,
    neighborhood_radius: f32,
    source: Option<&'a PointCloud>,
    target: Option<&'a PointCloud>,
    state: IcpState,
    transformation: Matrix4<f32>,
    rmse: f32,
    fitness: f32,
    iterations: usize,
}

impl<'a> ColorIcp<'a> {
    pub fn new(
        max_iterations: usize,
        max_correspondence_distance: f32,
        neighborhood_radius: f32,
    ) -> Result<Self> {
        if max_iterations == 0 {
            return Err(Error::invalid_argument(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(max_correspondence_distance > 0.0) || !(neighborhood_radius > 0.0) {
            return Err(Error::invalid_argument(format!(
                "correspondence distance {} and neighborhood radius {} must be positive",
                max_correspondence_distance, neighborhood_radius
            )));
        }
        Ok(Self {
            max_iterations,
            max_correspondence_distance,
            neighborhood_radius,
            source: None,
            target: None,
            state: IcpState::Uninitialized,
            transformation: Matrix4::identity(),
            rmse: f32::MAX,
            fitness: 0.0,
            iterations: 0,
        })
    }

    pub fn state(&self) -> IcpState {
        self.state
    }

    pub fn set_source_point_cloud(&mut self, cloud: &'a PointCloud) {
        self.source = Some(cloud);
        self.update_readiness();
    }

    pub fn set_target_point_cloud(&mut self, cloud: &'a PointCloud) {
        self.target = Some(cloud);
        self.update_readiness();
    }

    fn update_readiness(&mut self) {
        if self.source.is_some() && self.target.is_some() {
            self.state = IcpState::Ready;
        }
    }

    /// Run the registration from the identity initialization. On success the
    /// recovered transform maps source into the target frame.
    pub fn align(&mut self) -> Result<()> {
        if self.state != IcpState::Ready {
            return Err(Error::invalid_argument(format!(
                "align() requires both clouds set, state is {:?}",
                self.state
            )));
        }
        match self.run() {
            Ok(()) => {
                self.state = IcpState::Aligned;
                Ok(())
            }
            Err(e) => {
                self.state = IcpState::Failed;
                Err(e)
            }
        }
    }

    fn run(&mut self) -> Result<()> {
        let source = self.source.expect("state machine guarantees source");
        let target = self.target.expect("state machine guarantees target");

        let target_normals = target
            .device_normals()
            .ok_or_else(|| Error::MissingNormals("target cloud has no normals".to_string()))?;

        let ctx = gpc_hal::GpuContext::global()
            .ok_or_else(|| Error::device("no GPU device available".to_string()))?;

        let corr_grid = target
            .build_grid(self.max_correspondence_distance)?
            .ok_or_else(|| {
                Error::NoCorrespondences("target cloud has no live points".to_string())
            })?;
        let nbh_grid = target
            .build_grid(self.neighborhood_radius)?
            .ok_or_else(|| {
                Error::NoCorrespondences("target cloud has no live points".to_string())
            })?;

        // The tangent-plane intensity model of the target is fitted once and
        // reused by every iteration.
        let gradients = icp::color_gradients(
            ctx,
            &nbh_grid,
            target.device_points(),
            target_normals,
            target.points_number() as u32,
            self.neighborhood_radius,
        )?;

        let num_src = source.points_number() as u32;
        let mut transformation = Matrix4::identity();
        let mut prev_rmse: Option<f32> = None;

        for iter in 0..self.max_iterations {
            let sums = icp::icp_accumulate(
                ctx,
                &corr_grid,
                target.device_points(),
                target_normals,
                &gradients,
                source.device_points(),
                num_src,
                &transformation,
                self.max_correspondence_distance,
                COLOR_WEIGHT_SIGMA,
            )?;

            if sums.pairs < MIN_CORRESPONDENCES {
                return Err(Error::NoCorrespondences(format!(
                    "iteration {} found {} pairs, need {}",
                    iter, sums.pairs, MIN_CORRESPONDENCES
                )));
            }

            let rmse = (sums.geo_sq_sum / sums.pairs as f32).sqrt();
            self.fitness = sums.pairs as f32 / source.live_points().max(1) as f32;

            let svd = sums.jtj.svd(true, true);
            let s_max = svd.singular_values[0];
            let s_min = svd.singular_values[5];
            if !(s_min > 0.0) || s_max / s_min > MAX_CONDITION_NUMBER {
                return Err(Error::Singular(format!(
                    "normal equations condition number beyond {:e}",
                    MAX_CONDITION_NUMBER
                )));
            }
            let delta = svd
                .solve(&(-sums.jtr), 0.0)
                .map_err(|e| Error::Singular(e.to_string()))?;

            transformation = se3::exponential_map(&delta) * transformation;
            self.rmse = rmse;
            self.iterations = iter + 1;

            let converged = delta.amax() < TRANSLATION_EPS
                && prev_rmse.map_or(true, |p| (p - rmse).abs() < RMSE_EPS);
            prev_rmse = Some(rmse);
            if converged {
                break;
            }
        }

        self.transformation = transformation;
        Ok(())
    }

    fn require_aligned(&self) -> Result<()> {
        if self.state != IcpState::Aligned {
            return Err(Error::invalid_argument(format!(
                "result accessors require a completed alignment, state is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// The recovered rigid transform; rotation orthonormal to 1e-5.
    pub fn transformation(&self) -> Result<Matrix4<f32>> {
        self.require_aligned()?;
        Ok(self.transformation)
    }

    /// Point-to-plane RMSE of the final correspondences, in meters.
    pub fn rmse(&self) -> Result<f32> {
        self.require_aligned()?;
        Ok(self.rmse)
    }

    /// Fraction of source points with a valid correspondence.
    pub fn fitness(&self) -> Result<f32> {
        self.require_aligned()?;
        Ok(self.fitness)
    }

    pub fn iterations(&self) -> Result<usize> {
        self.require_aligned()?;
        Ok(self.iterations)
    }
}

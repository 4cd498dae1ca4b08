use nalgebra::Point3;
use wgpu::util::DeviceExt;

use gpc_core::{Aabb, GpuPoint};

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::scan::exclusive_scan_with_total;
use crate::kernels::sort::radix_sort_pairs_u64;
use crate::kernels::dispatch_size_1d;
use crate::{Error, Result};

/// 21 bits per axis in the packed 64-bit cell key.
const MAX_AXIS_CELLS: u32 = 1 << 21;

/// Uniform block shared by every grid-hash kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GridUniforms {
    pub origin: [f32; 4],
    pub dims: [u32; 4],
    pub misc: [f32; 4],
    pub counts: [u32; 4],
}

/// Grid-hash acceleration structure over a device point cloud. Owned by the
/// operation that builds it; holds point indices only, never the points.
pub struct GpuGrid {
    pub origin: Point3<f32>,
    pub dims: [u32; 3],
    pub cell: f32,
    pub num_points: u32,
    pub live: u32,
    pub num_cells: u32,
    pub sorted_ids: DeviceBuffer<u32>,
    pub unique_keys: DeviceBuffer<[u32; 2]>,
    pub cell_start: DeviceBuffer<u32>,
}

impl GpuGrid {
    /// Build the index: hash live points to 64-bit cell keys, radix-sort the
    /// (key, id) pairs, then compact the occupied-cell table.
    pub fn build(
        ctx: &GpuContext,
        points: &DeviceBuffer<GpuPoint>,
        num_points: u32,
        live: u32,
        bbox: &Aabb,
        cell: f32,
    ) -> Result<Self> {
        if !(cell > 0.0) {
            return Err(Error::invalid_argument(format!(
                "grid cell size must be positive, got {}",
                cell
            )));
        }
        let dims = bbox.grid_dims(cell);
        if dims.iter().any(|&d| d >= MAX_AXIS_CELLS) {
            return Err(Error::invalid_argument(format!(
                "cell size {} produces {}x{}x{} cells, beyond the 2^21 per-axis key range",
                cell, dims[0], dims[1], dims[2]
            )));
        }

        let mut grid = Self {
            origin: bbox.min,
            dims,
            cell,
            num_points,
            live,
            num_cells: 0,
            sorted_ids: DeviceBuffer::alloc(ctx, num_points.max(1) as usize)?,
            unique_keys: DeviceBuffer::alloc(ctx, 1)?,
            cell_start: DeviceBuffer::alloc(ctx, 2)?,
        };
        if num_points == 0 || live == 0 {
            return Ok(grid);
        }

        let n = num_points as usize;
        let keys_lo = DeviceBuffer::<u32>::alloc(ctx, n)?;
        let keys_hi = DeviceBuffer::<u32>::alloc(ctx, n)?;
        let vals = DeviceBuffer::<u32>::alloc(ctx, n)?;

        let uniforms = grid.uniforms(0.0, num_points, 0);
        let params_buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Grid Params"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let keys_src = concat_shader(&[
            include_str!("grid_types.wgsl"),
            include_str!("grid_keys.wgsl"),
        ]);
        let pipeline = ctx.create_compute_pipeline(&keys_src, "compute_keys");
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Grid Keys BG"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: points.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: keys_lo.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: keys_hi.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: vals.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
        }
        ctx.submit(encoder);

        let sorted = radix_sort_pairs_u64(ctx, keys_lo, keys_hi, vals, num_points)?;
        grid.sorted_ids = sorted.values;

        // Boundary flags over the sorted keys, scanned into table slots.
        let flags = DeviceBuffer::<u32>::alloc(ctx, n)?;
        let compact_src = concat_shader(&[
            include_str!("grid_types.wgsl"),
            include_str!("grid_compact.wgsl"),
        ]);
        let shader = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Grid Compact Shader"),
                source: wgpu::ShaderSource::Wgsl(compact_src.into()),
            });

        let mark_pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Mark Boundaries Pipeline"),
                layout: None,
                module: &shader,
                entry_point: Some("mark_boundaries"),
                compilation_options: Default::default(),
                cache: None,
            });
        let bg_mark = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Mark BG"),
            layout: &mark_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: sorted.keys_lo.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sorted.keys_hi.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: flags.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            pass.set_pipeline(&mark_pipeline);
            pass.set_bind_group(0, &bg_mark, &[]);
            pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
        }
        ctx.submit(encoder);

        let num_cells = exclusive_scan_with_total(ctx, flags.buffer(), num_points)?;
        grid.num_cells = num_cells;
        grid.unique_keys = DeviceBuffer::alloc(ctx, num_cells.max(1) as usize)?;
        grid.cell_start = DeviceBuffer::alloc(ctx, num_cells as usize + 1)?;

        let scatter_pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Scatter Cells Pipeline"),
                layout: None,
                module: &shader,
                entry_point: Some("scatter_cells"),
                compilation_options: Default::default(),
                cache: None,
            });
        let bg_scatter = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scatter Cells BG"),
            layout: &scatter_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: sorted.keys_lo.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sorted.keys_hi.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: flags.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: grid.unique_keys.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: grid.cell_start.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            pass.set_pipeline(&scatter_pipeline);
            pass.set_bind_group(0, &bg_scatter, &[]);
            pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
        }
        ctx.submit(encoder);

        // Closing sentinel so cell extents are start[i+1] - start[i].
        ctx.queue.write_buffer(
            grid.cell_start.buffer(),
            (num_cells as u64) * 4,
            bytemuck::bytes_of(&live),
        );
        ctx.wait_idle()?;

        Ok(grid)
    }

    pub fn uniforms(&self, radius2: f32, count: u32, flags: u32) -> GridUniforms {
        GridUniforms {
            origin: [self.origin.x, self.origin.y, self.origin.z, self.cell],
            dims: [self.dims[0], self.dims[1], self.dims[2], self.num_cells],
            misc: [radius2, 0.0, 0.0, 0.0],
            counts: [count, self.live, flags, 0],
        }
    }
}

/// Glue shared WGSL sources with a kernel body into one module.
pub fn concat_shader(parts: &[&str]) -> String {
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpc_core::PointProperty;
    use nalgebra::Vector3;

    #[test]
    fn test_grid_build_cell_table() {
        let Some(ctx) = GpuContext::global() else {
            return;
        };
        // Two tight clumps one metre apart: two occupied cells at h = 0.5.
        let mut pts = Vec::new();
        for i in 0..10 {
            pts.push(GpuPoint::new(
                Point3::new(0.01 * i as f32, 0.0, 0.0),
                Vector3::zeros(),
                PointProperty::Active,
            ));
        }
        for i in 0..5 {
            pts.push(GpuPoint::new(
                Point3::new(1.0 + 0.01 * i as f32, 0.0, 0.0),
                Vector3::zeros(),
                PointProperty::Active,
            ));
        }
        let buf = DeviceBuffer::from_slice(ctx, &pts).unwrap();
        let bbox = crate::kernels::reduce::bounding_box(ctx, &buf, pts.len() as u32)
            .unwrap()
            .unwrap();
        let grid = GpuGrid::build(ctx, &buf, pts.len() as u32, pts.len() as u32, &bbox, 0.5)
            .unwrap();

        assert_eq!(grid.num_cells, 2);
        let starts = grid.cell_start.read(ctx).unwrap();
        assert_eq!(starts, vec![0, 10, 15]);

        let ids = grid.sorted_ids.read(ctx).unwrap();
        assert_eq!(&ids[0..10], &(0..10).collect::<Vec<u32>>()[..]);
        assert_eq!(&ids[10..15], &(10..15).collect::<Vec<u32>>()[..]);
    }

    #[test]
    fn test_grid_rejects_bad_cell() {
        let Some(ctx) = GpuContext::global() else {
            return;
        };
        let pts = vec![GpuPoint::new(
            Point3::origin(),
            Vector3::zeros(),
            PointProperty::Active,
        )];
        let buf = DeviceBuffer::from_slice(ctx, &pts).unwrap();
        let bbox = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        assert!(GpuGrid::build(ctx, &buf, 1, 1, &bbox, 0.0).is_err());
        assert!(GpuGrid::build(ctx, &buf, 1, 1, &bbox, -0.1).is_err());
    }
}

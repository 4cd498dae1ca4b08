use wgpu::util::DeviceExt;

use gpc_core::GpuPoint;

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::grid::{concat_shader, GpuGrid};
use crate::kernels::dispatch_size_1d;
use crate::Result;

/// Collapse each occupied voxel of the grid to the arithmetic mean of its
/// contributors. Output length equals the occupied cell count, ordered by
/// ascending cell key; every output point is active.
pub fn voxel_reduce(
    ctx: &GpuContext,
    grid: &GpuGrid,
    points: &DeviceBuffer<GpuPoint>,
) -> Result<DeviceBuffer<GpuPoint>> {
    let out = DeviceBuffer::<GpuPoint>::alloc(ctx, grid.num_cells.max(1) as usize)?;
    if grid.num_cells == 0 {
        return Ok(out);
    }

    let uniforms = grid.uniforms(0.0, grid.num_points, 0);
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Voxel Reduce Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let src = concat_shader(&[
        include_str!("grid_types.wgsl"),
        include_str!("voxel_reduce.wgsl"),
    ]);
    let pipeline = ctx.create_compute_pipeline(&src, "reduce_voxels");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Voxel Reduce BG"),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: grid.sorted_ids.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: grid.cell_start.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: out.buffer().as_entire_binding(),
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
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(dispatch_size_1d(grid.num_cells), 1, 1);
    }
    ctx.submit(encoder);
    ctx.wait_idle()?;

    Ok(out)
}

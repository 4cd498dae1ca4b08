use nalgebra::Point3;
use wgpu::util::DeviceExt;

use gpc_core::GpuPoint;

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::grid::{concat_shader, GpuGrid};
use crate::kernels::dispatch_size_1d;
use crate::Result;

/// Covariance normals over a radius neighborhood, oriented toward the
/// sensor origin. Returns the normal buffer (`w = 1` valid, `w = 0`
/// degenerate) and the number of points demoted to invalid.
pub fn estimate_normals(
    ctx: &GpuContext,
    grid: &GpuGrid,
    points: &DeviceBuffer<GpuPoint>,
    num_points: u32,
    radius: f32,
    sensor_origin: Point3<f32>,
) -> Result<(DeviceBuffer<[f32; 4]>, u32)> {
    let normals = DeviceBuffer::<[f32; 4]>::zeroed(ctx, num_points.max(1) as usize)?;
    if num_points == 0 {
        return Ok((normals, 0));
    }

    let mut uniforms = grid.uniforms(radius * radius, num_points, 0);
    uniforms.misc = [
        radius * radius,
        sensor_origin.x,
        sensor_origin.y,
        sensor_origin.z,
    ];
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Normals Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let src = concat_shader(&[
        include_str!("grid_types.wgsl"),
        include_str!("grid_search.wgsl"),
        include_str!("normals.wgsl"),
    ]);
    let pipeline = ctx.create_compute_pipeline(&src, "estimate_normals");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Normals BG"),
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
                resource: grid.unique_keys.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: grid.cell_start.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: normals.buffer().as_entire_binding(),
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
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
    }
    ctx.submit(encoder);

    // The validity flags are applied to the point properties only after the
    // gather pass completed, keeping the cloud intact on launch failure.
    let demoted_buf = DeviceBuffer::<u32>::zeroed(ctx, 1)?;
    let n_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Normals Apply N"),
            contents: bytemuck::bytes_of(&num_points),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let apply_pipeline =
        ctx.create_compute_pipeline(include_str!("normals_apply.wgsl"), "apply_normal_validity");
    let bg_apply = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Normals Apply BG"),
        layout: &apply_pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: normals.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: demoted_buf.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: n_buffer.as_entire_binding(),
            },
        ],
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
        pass.set_pipeline(&apply_pipeline);
        pass.set_bind_group(0, &bg_apply, &[]);
        pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
    }
    ctx.submit(encoder);

    let demoted = demoted_buf.read(ctx)?[0];
    Ok((normals, demoted))
}

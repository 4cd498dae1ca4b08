use nalgebra::Point3;
use wgpu::util::DeviceExt;

use gpc_core::{Aabb, GpuPoint};

use crate::buffer::{read_buffer, DeviceBuffer};
use crate::gpu::GpuContext;
use crate::kernels::dispatch_size_1d;
use crate::Result;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BboxPartial {
    mn: [f32; 4],
    mx: [f32; 4],
}

const BIG: f32 = 3.0e38;

/// Axis-aligned bounding box over the live points of a device cloud.
/// Two-stage workgroup reduction; returns `None` when no live point exists.
pub fn bounding_box(
    ctx: &GpuContext,
    points: &DeviceBuffer<GpuPoint>,
    num_points: u32,
) -> Result<Option<Aabb>> {
    if num_points == 0 {
        return Ok(None);
    }

    let shader = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("BBox Reduce Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("bbox_reduce.wgsl").into()),
        });

    let points_pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("BBox Points Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("reduce_points"),
            compilation_options: Default::default(),
            cache: None,
        });
    let partials_pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("BBox Partials Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("reduce_partials"),
            compilation_options: Default::default(),
            cache: None,
        });

    let mut elements = num_points;
    let mut workgroups = dispatch_size_1d(elements);
    let mut partials = DeviceBuffer::<BboxPartial>::alloc(ctx, workgroups as usize)?;

    let n_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("BBox NumElements"),
            contents: bytemuck::bytes_of(&elements),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("BBox Points BG"),
        layout: &points_pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: partials.buffer().as_entire_binding(),
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
        pass.set_pipeline(&points_pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }
    ctx.submit(encoder);

    elements = workgroups;
    while elements > 1 {
        workgroups = dispatch_size_1d(elements);
        let next = DeviceBuffer::<BboxPartial>::alloc(ctx, workgroups as usize)?;

        ctx.queue
            .write_buffer(&n_buffer, 0, bytemuck::bytes_of(&elements));

        let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("BBox Partials BG"),
            layout: &partials_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: partials.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: next.buffer().as_entire_binding(),
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
            pass.set_pipeline(&partials_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        ctx.submit(encoder);

        partials = next;
        elements = workgroups;
    }

    let result: Vec<BboxPartial> = pollster::block_on(read_buffer(
        ctx,
        partials.buffer(),
        0,
        std::mem::size_of::<BboxPartial>(),
    ))?;
    let p = result[0];

    if p.mn[0] > p.mx[0] {
        return Ok(None);
    }
    Ok(Some(Aabb::new(
        Point3::new(p.mn[0], p.mn[1], p.mn[2]),
        Point3::new(p.mx[0], p.mx[1], p.mx[2]),
    )))
}

use gpc_core::GpuPoint;

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::scan::exclusive_scan_with_total;
use crate::kernels::dispatch_size_1d;
use crate::Result;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CompactParams {
    num_elements: u32,
    total: u32,
    min_neighbors: u32,
    pad: u32,
}

/// Keep the points whose neighbor count reaches `min_neighbors`, dropping
/// invalid points along the way. Survivors preserve their input order.
pub fn compact_points(
    ctx: &GpuContext,
    points: &DeviceBuffer<GpuPoint>,
    counts: &DeviceBuffer<u32>,
    num_points: u32,
    min_neighbors: u32,
) -> Result<DeviceBuffer<GpuPoint>> {
    if num_points == 0 {
        return DeviceBuffer::alloc(ctx, 0);
    }

    let flags = DeviceBuffer::<u32>::alloc(ctx, num_points as usize)?;
    let params_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Compact Params"),
        size: std::mem::size_of::<CompactParams>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let write_params = |total: u32| {
        let params = CompactParams {
            num_elements: num_points,
            total,
            min_neighbors,
            pad: 0,
        };
        ctx.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));
    };
    write_params(0);

    let shader = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Compact Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("compact.wgsl").into()),
        });

    let mask_pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Mask Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("mask_by_count"),
            compilation_options: Default::default(),
            cache: None,
        });
    let bg_mask = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Mask BG"),
        layout: &mask_pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: counts.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: flags.buffer().as_entire_binding(),
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
        pass.set_pipeline(&mask_pipeline);
        pass.set_bind_group(0, &bg_mask, &[]);
        pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
    }
    ctx.submit(encoder);

    let total = exclusive_scan_with_total(ctx, flags.buffer(), num_points)?;
    write_params(total);

    if total == 0 {
        return DeviceBuffer::alloc(ctx, 0);
    }
    let out = DeviceBuffer::<GpuPoint>::alloc(ctx, total as usize)?;

    let scatter_pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Scatter Survivors Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("scatter_survivors"),
            compilation_options: Default::default(),
            cache: None,
        });
    let bg_scatter = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Scatter Survivors BG"),
        layout: &scatter_pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: flags.buffer().as_entire_binding(),
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
        pass.set_pipeline(&scatter_pipeline);
        pass.set_bind_group(0, &bg_scatter, &[]);
        pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
    }
    ctx.submit(encoder);
    ctx.wait_idle()?;

    Ok(out)
}

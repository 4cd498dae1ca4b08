use nalgebra::Matrix4;
use wgpu::util::DeviceExt;

use gpc_core::GpuPoint;

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::dispatch_size_1d;
use crate::Result;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct TransformParams {
    matrix: [[f32; 4]; 4],
    num_elements: u32,
    pad: [u32; 3],
}

/// Apply a rigid transform to a device cloud in place. Stored normals, when
/// present, are rotated with the same matrix.
pub fn transform_cloud(
    ctx: &GpuContext,
    points: &DeviceBuffer<GpuPoint>,
    normals: Option<&DeviceBuffer<[f32; 4]>>,
    num_points: u32,
    transform: &Matrix4<f32>,
) -> Result<()> {
    if num_points == 0 {
        return Ok(());
    }

    let params = TransformParams {
        matrix: (*transform).into(),
        num_elements: num_points,
        pad: [0; 3],
    };
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Transform Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let shader = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Transform Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("transform_points.wgsl").into()),
        });

    let dummy_normals;
    let normals_binding = match normals {
        Some(n) => n.buffer(),
        None => {
            dummy_normals = DeviceBuffer::<[f32; 4]>::zeroed(ctx, 1)?;
            dummy_normals.buffer()
        }
    };

    let run = |entry: &str, count: u32| {
        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Transform Pipeline"),
                layout: None,
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            });
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 2,
            resource: params_buffer.as_entire_binding(),
        }];
        if entry == "transform_points" {
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: points.buffer().as_entire_binding(),
            });
        } else {
            entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: normals_binding.as_entire_binding(),
            });
        }
        let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Transform BG"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(dispatch_size_1d(count), 1, 1);
        }
        ctx.submit(encoder);
    };

    run("transform_points", num_points);
    if normals.is_some() {
        run("rotate_normals", num_points);
    }
    ctx.wait_idle()?;
    Ok(())
}

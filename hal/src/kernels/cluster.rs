use wgpu::util::DeviceExt;

use gpc_core::GpuPoint;

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::dispatch_size_1d;
use crate::{Error, Result};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ClusterParams {
    node_count: u32,
    edge_count: u32,
    pad: [u32; 2],
}

pub const UNASSIGNED: u32 = u32::MAX;

const MAX_ROUNDS: u32 = 4096;

/// Connected components over an explicit edge list: atomic-min hooking plus
/// pointer jumping until a round leaves the forest unchanged. Every label
/// ends up at the smallest point index of its component; invalid points
/// stay `UNASSIGNED`.
pub fn connected_components(
    ctx: &GpuContext,
    points: &DeviceBuffer<GpuPoint>,
    edges: &DeviceBuffer<[u32; 2]>,
    num_points: u32,
    num_edges: u32,
) -> Result<Vec<u32>> {
    if num_points == 0 {
        return Ok(Vec::new());
    }

    let parent = DeviceBuffer::<u32>::alloc(ctx, num_points as usize)?;
    let changed = DeviceBuffer::<u32>::zeroed(ctx, 1)?;

    let params = ClusterParams {
        node_count: num_points,
        edge_count: num_edges,
        pad: [0; 2],
    };
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cluster Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let shader = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cluster Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("cluster.wgsl").into()),
        });
    let make_pipeline = |entry: &str| {
        ctx.device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Cluster Pipeline"),
                layout: None,
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
    };
    let init_pipeline = make_pipeline("init_labels");
    let hook_pipeline = make_pipeline("hook_edges");
    let jump_pipeline = make_pipeline("jump");

    // Auto layouts only contain the bindings each entry point touches.
    let make_bg = |pipeline: &wgpu::ComputePipeline, bindings: &[u32]| {
        let entries: Vec<wgpu::BindGroupEntry> = bindings
            .iter()
            .map(|&binding| wgpu::BindGroupEntry {
                binding,
                resource: match binding {
                    0 => points.buffer().as_entire_binding(),
                    1 => edges.buffer().as_entire_binding(),
                    2 => parent.buffer().as_entire_binding(),
                    3 => changed.buffer().as_entire_binding(),
                    _ => params_buffer.as_entire_binding(),
                },
            })
            .collect();
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Cluster BG"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        })
    };

    let bg_init = make_bg(&init_pipeline, &[0, 2, 4]);
    let bg_hook = make_bg(&hook_pipeline, &[1, 2, 3, 4]);
    let bg_jump = make_bg(&jump_pipeline, &[2, 3, 4]);

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
        pass.set_pipeline(&init_pipeline);
        pass.set_bind_group(0, &bg_init, &[]);
        pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
    }
    ctx.submit(encoder);

    for round in 0..MAX_ROUNDS {
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.clear_buffer(changed.buffer(), 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            if num_edges > 0 {
                pass.set_pipeline(&hook_pipeline);
                pass.set_bind_group(0, &bg_hook, &[]);
                pass.dispatch_workgroups(dispatch_size_1d(num_edges), 1, 1);
            }
            pass.set_pipeline(&jump_pipeline);
            pass.set_bind_group(0, &bg_jump, &[]);
            pass.dispatch_workgroups(dispatch_size_1d(num_points), 1, 1);
        }
        ctx.submit(encoder);

        if changed.read(ctx)?[0] == 0 {
            break;
        }
        if round + 1 == MAX_ROUNDS {
            return Err(Error::device(
                "connected components failed to converge".to_string(),
            ));
        }
    }

    parent.read(ctx)
}

use nalgebra::{Matrix4, Matrix6, Vector6};
use wgpu::util::DeviceExt;

use gpc_core::GpuPoint;

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::grid::{concat_shader, GpuGrid};
use crate::kernels::dispatch_size_1d;
use crate::Result;

const STRIDE: usize = 29;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct IcpUniforms {
    transform: [[f32; 4]; 4],
    origin: [f32; 4],
    dims: [u32; 4],
    misc: [f32; 4],
    counts: [u32; 4],
}

/// Summed Gauss-Newton terms for one ICP iteration.
pub struct IcpSums {
    pub jtj: Matrix6<f32>,
    pub jtr: Vector6<f32>,
    pub geo_sq_sum: f32,
    pub pairs: u32,
}

/// Per-target-point intensity gradients on the tangent plane, fitted once
/// per alignment over the `neighborhood` grid and cached across iterations.
pub fn color_gradients(
    ctx: &GpuContext,
    grid: &GpuGrid,
    points: &DeviceBuffer<GpuPoint>,
    normals: &DeviceBuffer<[f32; 4]>,
    num_points: u32,
    radius: f32,
) -> Result<DeviceBuffer<[f32; 4]>> {
    let gradients = DeviceBuffer::<[f32; 4]>::zeroed(ctx, num_points.max(1) as usize)?;
    if num_points == 0 || grid.num_cells == 0 {
        return Ok(gradients);
    }

    let uniforms = grid.uniforms(radius * radius, num_points, 0);
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Color Gradient Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let src = concat_shader(&[
        include_str!("grid_types.wgsl"),
        include_str!("grid_search.wgsl"),
        include_str!("color_gradient.wgsl"),
    ]);
    let pipeline = ctx.create_compute_pipeline(&src, "color_gradients");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Color Gradient BG"),
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
                resource: gradients.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
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
    ctx.wait_idle()?;
    Ok(gradients)
}

/// One joint accumulation pass: per-source correspondence search against the
/// target grid, residual rows, then a fixed-shape tree reduction down to a
/// single record read back to the host.
#[allow(clippy::too_many_arguments)]
pub fn icp_accumulate(
    ctx: &GpuContext,
    grid: &GpuGrid,
    tgt_points: &DeviceBuffer<GpuPoint>,
    tgt_normals: &DeviceBuffer<[f32; 4]>,
    tgt_gradients: &DeviceBuffer<[f32; 4]>,
    src_points: &DeviceBuffer<GpuPoint>,
    num_src: u32,
    transform: &Matrix4<f32>,
    max_corr_dist: f32,
    sigma: f32,
) -> Result<IcpSums> {
    if num_src == 0 || grid.num_cells == 0 {
        return Ok(IcpSums {
            jtj: Matrix6::zeros(),
            jtr: Vector6::zeros(),
            geo_sq_sum: 0.0,
            pairs: 0,
        });
    }

    let uniforms = IcpUniforms {
        transform: (*transform).into(),
        origin: [grid.origin.x, grid.origin.y, grid.origin.z, grid.cell],
        dims: [grid.dims[0], grid.dims[1], grid.dims[2], grid.num_cells],
        misc: [max_corr_dist * max_corr_dist, sigma, 0.0, 0.0],
        counts: [num_src, grid.live, 0, 0],
    };
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ICP Step Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let scratch = DeviceBuffer::<f32>::alloc(ctx, num_src as usize * STRIDE)?;

    let src = concat_shader(&[
        include_str!("grid_types.wgsl"),
        include_str!("grid_search.wgsl"),
        include_str!("icp_step.wgsl"),
    ]);
    let pipeline = ctx.create_compute_pipeline(&src, "accumulate");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("ICP Step BG"),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: tgt_points.buffer().as_entire_binding(),
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
                resource: tgt_normals.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: tgt_gradients.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: src_points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 7,
                resource: scratch.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 8,
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
        pass.dispatch_workgroups(dispatch_size_1d(num_src), 1, 1);
    }
    ctx.submit(encoder);

    // Tree-reduce the per-point records down to one.
    let reduce_pipeline =
        ctx.create_compute_pipeline(include_str!("icp_reduce.wgsl"), "reduce");

    let mut elements = num_src;
    let mut current = scratch;
    while elements > 1 {
        let workgroups = elements.div_ceil(128);
        let next = DeviceBuffer::<f32>::alloc(ctx, workgroups as usize * STRIDE)?;

        let n_buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("ICP Reduce N"),
                contents: bytemuck::bytes_of(&elements),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ICP Reduce BG"),
            layout: &reduce_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: current.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: next.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: n_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            pass.set_pipeline(&reduce_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        ctx.submit(encoder);

        current = next;
        elements = workgroups;
    }

    let final_data = current.read_range(ctx, 0, STRIDE)?;

    let mut jtj = Matrix6::<f32>::zeros();
    let mut idx = 0;
    for a in 0..6 {
        for b in a..6 {
            jtj[(a, b)] = final_data[idx];
            jtj[(b, a)] = final_data[idx];
            idx += 1;
        }
    }
    let mut jtr = Vector6::<f32>::zeros();
    for a in 0..6 {
        jtr[a] = final_data[idx];
        idx += 1;
    }

    Ok(IcpSums {
        jtj,
        jtr,
        geo_sq_sum: final_data[idx],
        pairs: final_data[idx + 1] as u32,
    })
}

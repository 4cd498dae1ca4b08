use wgpu::util::DeviceExt;

use gpc_core::GpuPoint;

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::grid::{concat_shader, GpuGrid};
use crate::kernels::scan::exclusive_scan_with_total;
use crate::kernels::dispatch_size_1d;
use crate::{Error, Result};

/// Strip point positions into a plain `vec4` array usable as a query set.
pub fn positions_of(
    ctx: &GpuContext,
    points: &DeviceBuffer<GpuPoint>,
    num_points: u32,
) -> Result<DeviceBuffer<[f32; 4]>> {
    let out = DeviceBuffer::<[f32; 4]>::alloc(ctx, num_points.max(1) as usize)?;
    if num_points == 0 {
        return Ok(out);
    }
    let n_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Extract Positions N"),
            contents: bytemuck::bytes_of(&num_points),
            usage: wgpu::BufferUsages::UNIFORM,
        });
    let pipeline =
        ctx.create_compute_pipeline(include_str!("extract_positions.wgsl"), "extract_positions");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Extract Positions BG"),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: out.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: n_buffer.as_entire_binding(),
            },
        ],
    });
    run_1d(ctx, &pipeline, &bg, num_points);
    Ok(out)
}

fn check_radius(grid: &GpuGrid, radius: f32) -> Result<()> {
    if !(radius > 0.0) {
        return Err(Error::invalid_argument(format!(
            "search radius must be positive, got {}",
            radius
        )));
    }
    if radius > grid.cell {
        return Err(Error::invalid_argument(format!(
            "search radius {} exceeds grid cell size {}",
            radius, grid.cell
        )));
    }
    Ok(())
}

fn query_shader(ctx: &GpuContext, body: &str, entry: &str) -> wgpu::ComputePipeline {
    let src = concat_shader(&[
        include_str!("grid_types.wgsl"),
        include_str!("grid_search.wgsl"),
        body,
    ]);
    ctx.create_compute_pipeline(&src, entry)
}

fn run_1d(ctx: &GpuContext, pipeline: &wgpu::ComputePipeline, bg: &wgpu::BindGroup, count: u32) {
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bg, &[]);
        pass.dispatch_workgroups(dispatch_size_1d(count), 1, 1);
    }
    ctx.submit(encoder);
}

/// Per-query neighbor counts within `radius`. With `exclude_self` the query
/// at index `i` is taken to be cloud point `i` and is not counted.
pub fn neighbor_counts(
    ctx: &GpuContext,
    grid: &GpuGrid,
    points: &DeviceBuffer<GpuPoint>,
    queries: &DeviceBuffer<[f32; 4]>,
    num_queries: u32,
    radius: f32,
    exclude_self: bool,
) -> Result<DeviceBuffer<u32>> {
    check_radius(grid, radius)?;
    let counts = DeviceBuffer::<u32>::zeroed(ctx, num_queries.max(1) as usize)?;
    if num_queries == 0 || grid.num_cells == 0 {
        return Ok(counts);
    }

    let uniforms = grid.uniforms(radius * radius, num_queries, exclude_self as u32);
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Radius Count Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let pipeline = query_shader(ctx, include_str!("radius_count.wgsl"), "count_radius");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Radius Count BG"),
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
                resource: queries.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: counts.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: params_buffer.as_entire_binding(),
            },
        ],
    });
    run_1d(ctx, &pipeline, &bg, num_queries);
    ctx.wait_idle()?;
    Ok(counts)
}

/// Materialized radius search: per-query offsets into a packed array of
/// `(point_id, bitcast distance²)` hits.
pub struct RadiusHits {
    pub offsets: DeviceBuffer<u32>,
    pub hits: DeviceBuffer<[u32; 2]>,
    pub total: u32,
}

pub fn radius_search(
    ctx: &GpuContext,
    grid: &GpuGrid,
    points: &DeviceBuffer<GpuPoint>,
    queries: &DeviceBuffer<[f32; 4]>,
    num_queries: u32,
    radius: f32,
    exclude_self: bool,
) -> Result<RadiusHits> {
    let offsets = neighbor_counts(ctx, grid, points, queries, num_queries, radius, exclude_self)?;
    let total = exclusive_scan_with_total(ctx, offsets.buffer(), num_queries)?;
    let hits = DeviceBuffer::<[u32; 2]>::alloc(ctx, total.max(1) as usize)?;
    if total == 0 {
        return Ok(RadiusHits {
            offsets,
            hits,
            total,
        });
    }

    let uniforms = grid.uniforms(radius * radius, num_queries, exclude_self as u32);
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Radius Fill Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let pipeline = query_shader(ctx, include_str!("radius_fill.wgsl"), "fill_radius");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Radius Fill BG"),
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
                resource: queries.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: offsets.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: hits.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 7,
                resource: params_buffer.as_entire_binding(),
            },
        ],
    });
    run_1d(ctx, &pipeline, &bg, num_queries);
    ctx.wait_idle()?;

    Ok(RadiusHits {
        offsets,
        hits,
        total,
    })
}

/// Per-query nearest point id within `max_dist2` over the 27-cell
/// neighborhood, `-1` when none. Ties go to the smaller id.
pub fn nearest_neighbors(
    ctx: &GpuContext,
    grid: &GpuGrid,
    points: &DeviceBuffer<GpuPoint>,
    queries: &DeviceBuffer<[f32; 4]>,
    num_queries: u32,
    max_dist2: f32,
) -> Result<DeviceBuffer<i32>> {
    let out = DeviceBuffer::<i32>::from_slice(ctx, &vec![-1i32; num_queries.max(1) as usize])?;
    if num_queries == 0 || grid.num_cells == 0 {
        return Ok(out);
    }

    let uniforms = grid.uniforms(max_dist2, num_queries, 0);
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Nearest Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let pipeline = query_shader(ctx, include_str!("nearest.wgsl"), "find_nearest");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Nearest BG"),
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
                resource: queries.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: out.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: params_buffer.as_entire_binding(),
            },
        ],
    });
    run_1d(ctx, &pipeline, &bg, num_queries);
    ctx.wait_idle()?;
    Ok(out)
}

/// All unordered `(i, j)` pairs with `i < j` and distance within `radius`.
/// With `convex_normals` set, an edge survives only when both normals are
/// valid and each endpoint looks toward the other.
pub fn pairs_within(
    ctx: &GpuContext,
    grid: &GpuGrid,
    points: &DeviceBuffer<GpuPoint>,
    num_points: u32,
    radius: f32,
    convex_normals: Option<&DeviceBuffer<[f32; 4]>>,
) -> Result<(DeviceBuffer<[u32; 2]>, u32)> {
    check_radius(grid, radius)?;

    let dummy_normals;
    let (normals, flags) = match convex_normals {
        Some(n) => (n, 1u32),
        None => {
            dummy_normals = DeviceBuffer::<[f32; 4]>::zeroed(ctx, 1)?;
            (&dummy_normals, 0u32)
        }
    };

    let counts = DeviceBuffer::<u32>::zeroed(ctx, num_points.max(1) as usize)?;
    if num_points == 0 || grid.num_cells == 0 {
        return Ok((DeviceBuffer::alloc(ctx, 1)?, 0));
    }

    let uniforms = grid.uniforms(radius * radius, num_points, flags);
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pairs Params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let src = concat_shader(&[
        include_str!("grid_types.wgsl"),
        include_str!("grid_search.wgsl"),
        include_str!("pairs.wgsl"),
    ]);
    let shader = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Pairs Shader"),
            source: wgpu::ShaderSource::Wgsl(src.into()),
        });

    let make_pipeline = |entry: &str| {
        ctx.device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Pairs Pipeline"),
                layout: None,
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
    };

    let count_pipeline = make_pipeline("count_pairs");
    let dummy_pairs = DeviceBuffer::<[u32; 2]>::alloc(ctx, 1)?;
    fn common_entries<'a>(
        points: &'a DeviceBuffer<GpuPoint>,
        grid: &'a GpuGrid,
        normals: &'a DeviceBuffer<[f32; 4]>,
        counts: &'a DeviceBuffer<u32>,
        params_buffer: &'a wgpu::Buffer,
        pairs: &'a wgpu::Buffer,
    ) -> Vec<wgpu::BindGroupEntry<'a>> {
        vec![
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
                resource: counts.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: pairs.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 7,
                resource: params_buffer.as_entire_binding(),
            },
        ]
    }

    let bg_count = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Pairs Count BG"),
        layout: &count_pipeline.get_bind_group_layout(0),
        entries: &common_entries(
            points,
            grid,
            normals,
            &counts,
            &params_buffer,
            dummy_pairs.buffer(),
        ),
    });
    run_1d(ctx, &count_pipeline, &bg_count, num_points);

    let total = exclusive_scan_with_total(ctx, counts.buffer(), num_points)?;
    let pairs = DeviceBuffer::<[u32; 2]>::alloc(ctx, total.max(1) as usize)?;
    if total == 0 {
        return Ok((pairs, 0));
    }

    let fill_pipeline = make_pipeline("fill_pairs");
    let bg_fill = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Pairs Fill BG"),
        layout: &fill_pipeline.get_bind_group_layout(0),
        entries: &common_entries(
            points,
            grid,
            normals,
            &counts,
            &params_buffer,
            pairs.buffer(),
        ),
    });
    run_1d(ctx, &fill_pipeline, &bg_fill, num_points);
    ctx.wait_idle()?;

    Ok((pairs, total))
}

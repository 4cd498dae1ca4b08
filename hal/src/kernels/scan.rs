use wgpu::util::DeviceExt;

use crate::buffer::read_u32_at;
use crate::gpu::GpuContext;
use crate::Result;

const SCAN_BLOCK: u32 = 512;

/// In-place exclusive prefix sum over the first `num_elements` entries of a
/// `u32` buffer. Recurses over per-block sums.
pub fn gpu_exclusive_scan(
    ctx: &GpuContext,
    buffer: &wgpu::Buffer,
    num_elements: u32,
    scan_shader: &wgpu::ShaderModule,
) -> Result<()> {
    if num_elements == 0 {
        return Ok(());
    }

    let num_workgroups = num_elements.div_ceil(SCAN_BLOCK);
    let usages = wgpu::BufferUsages::STORAGE
        | wgpu::BufferUsages::COPY_SRC
        | wgpu::BufferUsages::COPY_DST;
    let block_sums_buffer = ctx.get_buffer((num_workgroups as u64) * 4, usages);

    let n_elements_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scan NumElements"),
            contents: bytemuck::bytes_of(&num_elements),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

    let scan_pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Scan Blocks Pipeline"),
            layout: None,
            module: scan_shader,
            entry_point: Some("scan_blocks"),
            compilation_options: Default::default(),
            cache: None,
        });

    let bg_scan = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Scan BG"),
        layout: &scan_pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: block_sums_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: n_elements_buffer.as_entire_binding(),
            },
        ],
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Scan Blocks"),
        });
    {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
        cpass.set_pipeline(&scan_pipeline);
        cpass.set_bind_group(0, &bg_scan, &[]);
        cpass.dispatch_workgroups(num_workgroups, 1, 1);
    }
    ctx.submit(encoder);

    if num_workgroups > 1 {
        gpu_exclusive_scan(ctx, &block_sums_buffer, num_workgroups, scan_shader)?;

        let add_pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Add Offsets Pipeline"),
                layout: None,
                module: scan_shader,
                entry_point: Some("add_offsets"),
                compilation_options: Default::default(),
                cache: None,
            });

        let bg_add = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Add Offsets BG"),
            layout: &add_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: block_sums_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: n_elements_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Add Offsets"),
            });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(&add_pipeline);
            cpass.set_bind_group(0, &bg_add, &[]);
            cpass.dispatch_workgroups(num_workgroups, 1, 1);
        }
        ctx.submit(encoder);
    }

    ctx.return_buffer(block_sums_buffer, usages);
    Ok(())
}

pub fn scan_module(ctx: &GpuContext) -> wgpu::ShaderModule {
    ctx.device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Scan Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("prefix_sum.wgsl").into()),
        })
}

/// Exclusive scan that also reports the total sum (the size needed by the
/// compaction and pair-emission passes).
pub fn exclusive_scan_with_total(
    ctx: &GpuContext,
    buffer: &wgpu::Buffer,
    num_elements: u32,
) -> Result<u32> {
    if num_elements == 0 {
        return Ok(0);
    }
    let last_in = read_u32_at(ctx, buffer, num_elements as usize - 1)?;
    let shader = scan_module(ctx);
    gpu_exclusive_scan(ctx, buffer, num_elements, &shader)?;
    let last_scanned = read_u32_at(ctx, buffer, num_elements as usize - 1)?;
    Ok(last_scanned + last_in)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DeviceBuffer;

    #[test]
    fn test_exclusive_scan_matches_cpu() {
        let Some(ctx) = GpuContext::global() else {
            return;
        };
        for n in [1usize, 17, 512, 513, 5000] {
            let data: Vec<u32> = (0..n).map(|i| (i % 7) as u32).collect();
            let buf = DeviceBuffer::from_slice(ctx, &data).unwrap();
            let total = exclusive_scan_with_total(ctx, buf.buffer(), n as u32).unwrap();

            let mut expected = Vec::with_capacity(n);
            let mut acc = 0u32;
            for v in &data {
                expected.push(acc);
                acc += v;
            }
            assert_eq!(buf.read(ctx).unwrap(), expected, "scan mismatch at n={}", n);
            assert_eq!(total, acc);
        }
    }
}

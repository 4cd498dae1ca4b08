use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::scan::{gpu_exclusive_scan, scan_module};
use crate::Result;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SortParams {
    num_elements: u32,
    shift: u32,
    word: u32,
    num_workgroups: u32,
}

/// Sorted `(key, value)` pairs with the 64-bit key split into two words.
pub struct SortedPairs {
    pub keys_lo: DeviceBuffer<u32>,
    pub keys_hi: DeviceBuffer<u32>,
    pub values: DeviceBuffer<u32>,
}

/// Stable LSD radix sort of 64-bit keys with attached `u32` values:
/// eight 8-bit passes, low word first. Equal keys keep their input order,
/// so per-cell point ranges come out in ascending point id.
pub fn radix_sort_pairs_u64(
    ctx: &GpuContext,
    keys_lo: DeviceBuffer<u32>,
    keys_hi: DeviceBuffer<u32>,
    values: DeviceBuffer<u32>,
    num_elements: u32,
) -> Result<SortedPairs> {
    if num_elements <= 1 {
        return Ok(SortedPairs {
            keys_lo,
            keys_hi,
            values,
        });
    }

    let num_workgroups = num_elements.div_ceil(256);
    let histogram_size = num_workgroups * 256;

    let n = num_elements as usize;
    let mut ping = (keys_lo, keys_hi, values);
    let mut pong = (
        DeviceBuffer::<u32>::alloc(ctx, n)?,
        DeviceBuffer::<u32>::alloc(ctx, n)?,
        DeviceBuffer::<u32>::alloc(ctx, n)?,
    );

    let usages = wgpu::BufferUsages::STORAGE
        | wgpu::BufferUsages::COPY_SRC
        | wgpu::BufferUsages::COPY_DST;
    let histogram_buffer = ctx.get_buffer((histogram_size as u64) * 4, usages);

    let params_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Sort Params"),
        size: std::mem::size_of::<SortParams>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let sort_shader = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Radix Sort Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("radix_sort.wgsl").into()),
        });
    let scan_shader = scan_module(ctx);

    let histogram_pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Histogram Pipeline"),
            layout: None,
            module: &sort_shader,
            entry_point: Some("histogram_pass"),
            compilation_options: Default::default(),
            cache: None,
        });
    let scatter_pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Scatter Pipeline"),
            layout: None,
            module: &sort_shader,
            entry_point: Some("scatter_pass"),
            compilation_options: Default::default(),
            cache: None,
        });

    for pass in 0..8u32 {
        let params = SortParams {
            num_elements,
            shift: (pass % 4) * 8,
            word: pass / 4,
            num_workgroups,
        };
        ctx.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        // The histogram entry only touches the input keys; the scatter entry
        // binds everything.
        let make_bind_group = |pipeline: &wgpu::ComputePipeline, bindings: &[u32]| {
            let entries: Vec<wgpu::BindGroupEntry> = bindings
                .iter()
                .map(|&binding| wgpu::BindGroupEntry {
                    binding,
                    resource: match binding {
                        0 => ping.0.buffer().as_entire_binding(),
                        1 => ping.1.buffer().as_entire_binding(),
                        2 => ping.2.buffer().as_entire_binding(),
                        3 => pong.0.buffer().as_entire_binding(),
                        4 => pong.1.buffer().as_entire_binding(),
                        5 => pong.2.buffer().as_entire_binding(),
                        6 => histogram_buffer.as_entire_binding(),
                        _ => params_buffer.as_entire_binding(),
                    },
                })
                .collect();
            ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Radix Pass BG"),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            })
        };

        let bg_hist = make_bind_group(&histogram_pipeline, &[0, 1, 6, 7]);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Histogram Pass"),
            });
        encoder.clear_buffer(&histogram_buffer, 0, None);
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(&histogram_pipeline);
            cpass.set_bind_group(0, &bg_hist, &[]);
            cpass.dispatch_workgroups(num_workgroups, 1, 1);
        }
        ctx.submit(encoder);

        gpu_exclusive_scan(ctx, &histogram_buffer, histogram_size, &scan_shader)?;

        let bg_scatter = make_bind_group(&scatter_pipeline, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Scatter Pass"),
            });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(&scatter_pipeline);
            cpass.set_bind_group(0, &bg_scatter, &[]);
            cpass.dispatch_workgroups(num_workgroups, 1, 1);
        }
        ctx.submit(encoder);

        std::mem::swap(&mut ping, &mut pong);
    }

    ctx.return_buffer(histogram_buffer, usages);

    // Eight passes leave the sorted data back in `ping`.
    Ok(SortedPairs {
        keys_lo: ping.0,
        keys_hi: ping.1,
        values: ping.2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_radix_sort_matches_cpu() {
        let Some(ctx) = GpuContext::global() else {
            return;
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let n = 4097usize;
        let keys: Vec<u64> = (0..n).map(|_| rng.random::<u64>() >> 1).collect();

        let lo: Vec<u32> = keys.iter().map(|&k| k as u32).collect();
        let hi: Vec<u32> = keys.iter().map(|&k| (k >> 32) as u32).collect();
        let vals: Vec<u32> = (0..n as u32).collect();

        let sorted = radix_sort_pairs_u64(
            ctx,
            DeviceBuffer::from_slice(ctx, &lo).unwrap(),
            DeviceBuffer::from_slice(ctx, &hi).unwrap(),
            DeviceBuffer::from_slice(ctx, &vals).unwrap(),
            n as u32,
        )
        .unwrap();

        let got_lo = sorted.keys_lo.read(ctx).unwrap();
        let got_hi = sorted.keys_hi.read(ctx).unwrap();
        let got_vals = sorted.values.read(ctx).unwrap();

        let mut expected: Vec<(u64, u32)> =
            keys.iter().enumerate().map(|(i, &k)| (k, i as u32)).collect();
        expected.sort_by_key(|&(k, i)| (k, i));

        for i in 0..n {
            let k = ((got_hi[i] as u64) << 32) | got_lo[i] as u64;
            assert_eq!(k, expected[i].0, "key mismatch at {}", i);
            assert_eq!(got_vals[i], expected[i].1, "value mismatch at {}", i);
        }
    }
}

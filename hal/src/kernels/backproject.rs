use wgpu::util::DeviceExt;

use gpc_core::{CameraIntrinsics, GpuPoint};

use crate::buffer::DeviceBuffer;
use crate::gpu::GpuContext;
use crate::kernels::dispatch_size_1d;
use crate::{Error, Result};

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CamParams {
    intr: [f32; 4],
    size: [u32; 4],
    clip: [f32; 4],
}

const DEPTH_SCALE: f32 = 0.001;

/// Back-project an RGB-D frame into one device point per pixel. Returns the
/// point buffer and the number of invalid pixels.
pub fn backproject_frame(
    ctx: &GpuContext,
    depth: &[u16],
    color: &[u8],
    intrinsics: &CameraIntrinsics,
    z_min: f32,
    z_max: f32,
) -> Result<(DeviceBuffer<GpuPoint>, u32)> {
    let pixels = intrinsics.pixel_count();
    if depth.len() != pixels || color.len() != pixels * 3 {
        return Err(Error::invalid_argument(format!(
            "frame buffers ({} depth, {} color bytes) do not match {}x{} intrinsics",
            depth.len(),
            color.len(),
            intrinsics.width,
            intrinsics.height
        )));
    }
    if !(z_min >= 0.0 && z_max > z_min) {
        return Err(Error::invalid_argument(format!(
            "depth clip range [{}, {}] is not ordered",
            z_min, z_max
        )));
    }
    if pixels == 0 {
        return Ok((DeviceBuffer::alloc(ctx, 0)?, 0));
    }

    // u16 depth and u8 colour are packed into 32-bit storage words.
    let mut depth_words = vec![0u32; pixels.div_ceil(2)];
    for (i, &d) in depth.iter().enumerate() {
        depth_words[i / 2] |= (d as u32) << ((i % 2) * 16);
    }
    let mut color_words = vec![0u32; (pixels * 3).div_ceil(4)];
    for (i, &c) in color.iter().enumerate() {
        color_words[i / 4] |= (c as u32) << ((i % 4) * 8);
    }

    let depth_buf = DeviceBuffer::from_slice(ctx, &depth_words)?;
    let color_buf = DeviceBuffer::from_slice(ctx, &color_words)?;
    let points = DeviceBuffer::<GpuPoint>::alloc(ctx, pixels)?;
    let counter = DeviceBuffer::<u32>::zeroed(ctx, 1)?;

    let params = CamParams {
        intr: [intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy],
        size: [intrinsics.width, intrinsics.height, pixels as u32, 0],
        clip: [z_min, z_max, DEPTH_SCALE, 0.0],
    };
    let params_buffer = ctx
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Backproject Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

    let pipeline = ctx.create_compute_pipeline(include_str!("backproject.wgsl"), "backproject");
    let bg = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Backproject BG"),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: depth_buf.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: color_buf.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: points.buffer().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: counter.buffer().as_entire_binding(),
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
        pass.dispatch_workgroups(dispatch_size_1d(pixels as u32), 1, 1);
    }
    ctx.submit(encoder);

    let invalid = counter.read(ctx)?[0];
    Ok((points, invalid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backproject_center_pixel() {
        let Some(ctx) = GpuContext::global() else {
            return;
        };
        let intr = CameraIntrinsics::new(500.0, 500.0, 1.0, 1.0, 3, 3);
        let mut depth = vec![0u16; 9];
        depth[4] = 1000; // centre pixel at 1 m
        depth[0] = 100; // 0.1 m, below the clip range
        let mut color = vec![0u8; 27];
        color[12] = 255;

        let (points, invalid) =
            backproject_frame(ctx, &depth, &color, &intr, 0.3, 1.5).unwrap();
        assert_eq!(invalid, 8);

        let out = points.read(ctx).unwrap();
        let center = out[4];
        assert!(center.is_valid());
        assert!((center.position[2] - 1.0).abs() < 1e-6);
        assert!(center.position[0].abs() < 1e-6);
        assert!((center.color[0] - 1.0).abs() < 1e-3);
        assert!(!out[0].is_valid());
    }
}

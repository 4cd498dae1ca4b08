use std::marker::PhantomData;
use std::sync::Arc;

use wgpu::{BufferUsages, MapMode};

use crate::gpu::GpuContext;
use crate::{Error, Result};

const STORAGE_USAGES: BufferUsages = BufferUsages::STORAGE
    .union(BufferUsages::COPY_SRC)
    .union(BufferUsages::COPY_DST);

/// Typed, length-bearing GPU array with exclusive ownership. The only
/// allocation failure surfaced is out-of-memory; element access past `len`
/// is guarded by the kernels' uniform bounds.
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    buffer: Arc<wgpu::Buffer>,
    len: usize,
    _phantom: PhantomData<T>,
}

impl<T: bytemuck::Pod> DeviceBuffer<T> {
    /// Allocate an uninitialized array of `len` elements.
    pub fn alloc(ctx: &GpuContext, len: usize) -> Result<Self> {
        let byte_size = (len * std::mem::size_of::<T>()).max(4) as u64;

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Device Array"),
            size: byte_size,
            usage: STORAGE_USAGES,
            mapped_at_creation: false,
        });
        if let Some(e) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(Error::OutOfMemory(format!(
                "device allocation of {} bytes failed: {}",
                byte_size, e
            )));
        }

        Ok(Self {
            buffer: Arc::new(buffer),
            len,
            _phantom: PhantomData,
        })
    }

    /// Allocate and zero-fill.
    pub fn zeroed(ctx: &GpuContext, len: usize) -> Result<Self> {
        let buf = Self::alloc(ctx, len)?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.clear_buffer(&buf.buffer, 0, None);
        ctx.submit(encoder);
        Ok(buf)
    }

    /// Allocate and upload from host memory.
    pub fn from_slice(ctx: &GpuContext, data: &[T]) -> Result<Self> {
        let buf = Self::alloc(ctx, data.len())?;
        if !data.is_empty() {
            ctx.queue
                .write_buffer(&buf.buffer, 0, bytemuck::cast_slice(data));
        }
        Ok(buf)
    }

    /// Synchronously download the whole array.
    pub fn read(&self, ctx: &GpuContext) -> Result<Vec<T>> {
        if self.len == 0 {
            return Ok(Vec::new());
        }
        pollster::block_on(read_buffer(
            ctx,
            &self.buffer,
            0,
            self.len * std::mem::size_of::<T>(),
        ))
    }

    /// Download `count` elements starting at element `offset`.
    pub fn read_range(&self, ctx: &GpuContext, offset: usize, count: usize) -> Result<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        pollster::block_on(read_buffer(
            ctx,
            &self.buffer,
            (offset * std::mem::size_of::<T>()) as u64,
            count * std::mem::size_of::<T>(),
        ))
    }

    /// Copy the full contents into `dst` (same length required).
    pub fn copy_to(&self, ctx: &GpuContext, dst: &DeviceBuffer<T>) -> Result<()> {
        if self.len != dst.len {
            return Err(Error::invalid_argument(format!(
                "copy between arrays of length {} and {}",
                self.len, dst.len
            )));
        }
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(
            &self.buffer,
            0,
            &dst.buffer,
            0,
            (self.len * std::mem::size_of::<T>()) as u64,
        );
        ctx.submit(encoder);
        Ok(())
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_size(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }
}

/// Download raw bytes from a GPU buffer through a pooled staging buffer.
pub async fn read_buffer<T: bytemuck::Pod>(
    ctx: &GpuContext,
    buffer: &wgpu::Buffer,
    offset: u64,
    size: usize,
) -> Result<Vec<T>> {
    let pool = crate::pool::global_pool();
    let aligned_size = ((size + 3) & !3) as u64;

    let staging_usage = BufferUsages::MAP_READ | BufferUsages::COPY_DST;
    let staging_buffer = pool.get(&ctx.device, aligned_size, staging_usage);

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_buffer_to_buffer(buffer, offset, &staging_buffer, 0, aligned_size);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let (tx, rx) = tokio::sync::oneshot::channel();
    let slice = staging_buffer.slice(..aligned_size);
    slice.map_async(MapMode::Read, move |res| {
        tx.send(res).ok();
    });

    let mut rx = rx;
    while rx.try_recv().is_err() {
        let _ = ctx.device.poll(wgpu::PollType::Poll);
        std::thread::yield_now();
    }

    rx.await
        .map_err(|_| Error::DeviceError("readback channel closed".to_string()))?
        .map_err(|e| Error::DeviceError(format!("buffer mapping failed: {}", e)))?;

    let data = slice.get_mapped_range();
    let result_full: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging_buffer.unmap();
    pool.return_buffer(staging_buffer, staging_usage);

    let num_elements = size / std::mem::size_of::<T>();
    Ok(result_full[..num_elements].to_vec())
}

/// Read a single `u32` element of a device array.
pub fn read_u32_at(ctx: &GpuContext, buffer: &wgpu::Buffer, index: usize) -> Result<u32> {
    let v: Vec<u32> = pollster::block_on(read_buffer(ctx, buffer, (index * 4) as u64, 4))?;
    Ok(v[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_download_roundtrip() {
        let Some(ctx) = GpuContext::global() else {
            return;
        };
        let data: Vec<u32> = (0..1000).map(|i| i * 7 + 1).collect();
        let buf = DeviceBuffer::from_slice(ctx, &data).unwrap();
        assert_eq!(buf.len(), 1000);
        assert_eq!(buf.read(ctx).unwrap(), data);
        assert_eq!(read_u32_at(ctx, buf.buffer(), 999).unwrap(), 999 * 7 + 1);
    }

    #[test]
    fn test_zeroed() {
        let Some(ctx) = GpuContext::global() else {
            return;
        };
        let buf = DeviceBuffer::<f32>::zeroed(ctx, 64).unwrap();
        assert!(buf.read(ctx).unwrap().iter().all(|&v| v == 0.0));
    }
}

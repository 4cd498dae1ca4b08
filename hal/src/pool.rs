use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use wgpu::{Buffer, BufferDescriptor, BufferUsages, Device};

/// A bucketed pool for reusing transient GPU buffers (sort passes, scans,
/// staging readback). Long-lived point buffers are allocated directly.
pub struct GpuBufferPool {
    buckets: Mutex<HashMap<BufferUsages, HashMap<u64, Vec<Buffer>>>>,
}

impl GpuBufferPool {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn size_bucket(size: u64) -> u64 {
        if size <= 1024 * 1024 {
            size.next_power_of_two().max(256)
        } else {
            size.div_ceil(1024 * 1024) * 1024 * 1024
        }
    }

    pub fn get(&self, device: &Device, size: u64, usage: BufferUsages) -> Buffer {
        let bucket_size = Self::size_bucket(size);
        let mut buckets = match self.buckets.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(pool) = buckets
            .get_mut(&usage)
            .and_then(|m| m.get_mut(&bucket_size))
        {
            if let Some(buffer) = pool.pop() {
                return buffer;
            }
        }

        device.create_buffer(&BufferDescriptor {
            label: Some("Pooled Compute Buffer"),
            size: bucket_size,
            usage,
            mapped_at_creation: false,
        })
    }

    pub fn return_buffer(&self, buffer: Buffer, usage: BufferUsages) {
        let size = buffer.size();
        let mut buckets = match self.buckets.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        let pool = buckets
            .entry(usage)
            .or_default()
            .entry(size)
            .or_default();
        if pool.len() < 8 {
            pool.push(buffer);
        }
    }

    pub fn clear(&self) {
        let mut buckets = match self.buckets.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.clear();
    }
}

impl Default for GpuBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_GPU_POOL: OnceLock<GpuBufferPool> = OnceLock::new();

pub fn global_pool() -> &'static GpuBufferPool {
    GLOBAL_GPU_POOL.get_or_init(GpuBufferPool::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_buckets() {
        assert_eq!(GpuBufferPool::size_bucket(100), 256);
        assert_eq!(GpuBufferPool::size_bucket(1024), 1024);
        assert_eq!(
            GpuBufferPool::size_bucket(1024 * 1024 + 1),
            2 * 1024 * 1024
        );
    }
}

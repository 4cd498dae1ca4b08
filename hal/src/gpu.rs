use std::sync::{Arc, OnceLock};

use futures::executor::block_on;
use wgpu::{Backends, Device, Instance, PowerPreference, Queue, RequestAdapterOptions};

use crate::{Error, Result};

static GLOBAL_CONTEXT: OnceLock<Option<GpuContext>> = OnceLock::new();

/// Shared GPU context containing device and queue. All core operations are
/// synchronous: they submit compute work and block until the device is idle.
#[derive(Debug)]
pub struct GpuContext {
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
}

impl GpuContext {
    /// Get the process-wide GPU context, initializing it on first use.
    /// Returns `None` when no adapter is available.
    pub fn global() -> Option<&'static GpuContext> {
        GLOBAL_CONTEXT.get_or_init(|| Self::new().ok()).as_ref()
    }

    /// Initialize a new GPU context (synchronous wrapper).
    pub fn new() -> Result<Self> {
        block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self> {
        Self::new_with_policy(PowerPreference::HighPerformance).await
    }

    pub async fn new_with_policy(preference: PowerPreference) -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: Backends::all(),
            flags: wgpu::InstanceFlags::default()
                .difference(wgpu::InstanceFlags::DEBUG | wgpu::InstanceFlags::VALIDATION),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::DeviceError(format!("no suitable GPU adapter: {}", e)))?;

        Self::from_adapter(adapter).await
    }

    pub async fn from_adapter(adapter: wgpu::Adapter) -> Result<Self> {
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("GPC Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::default(),
            })
            .await
            .map_err(|e| Error::DeviceError(format!("failed to create GPU device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Check if a GPU is available without initializing the global context.
    pub fn is_available() -> bool {
        block_on(async {
            let instance = Instance::new(&wgpu::InstanceDescriptor {
                backends: Backends::all(),
                ..Default::default()
            });
            !instance.enumerate_adapters(Backends::all()).is_empty()
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Submit a command encoder to the queue.
    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Block until all submitted work has completed.
    pub fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| Error::DeviceError(format!("device poll failed: {:?}", e)))?;
        Ok(())
    }

    /// Create a compute pipeline with an auto-derived layout.
    pub fn create_compute_pipeline(
        &self,
        shader_source: &str,
        entry_point: &str,
    ) -> wgpu::ComputePipeline {
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Compute Shader"),
                source: wgpu::ShaderSource::Wgsl(shader_source.into()),
            });

        self.device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Compute Pipeline"),
                layout: None,
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
    }

    /// Get a pooled scratch buffer.
    pub fn get_buffer(&self, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        crate::pool::global_pool().get(&self.device, size, usage)
    }

    /// Return a scratch buffer to the pool.
    pub fn return_buffer(&self, buffer: wgpu::Buffer, usage: wgpu::BufferUsages) {
        crate::pool::global_pool().return_buffer(buffer, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        match GpuContext::new() {
            Ok(c) => println!("GPU context created: {:?}", c.device),
            Err(e) => println!("GPU initialization failed (expected on some CI): {}", e),
        }
    }
}

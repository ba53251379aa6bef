// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::sync::Arc;

use tracing::debug;
use wgpu::{Device, Limits, Queue};

use crate::error::{GpuError, Result};
use crate::util::ShaderCache;

/// Device/queue pair handed to executors at bind time.
///
/// The context never owns the device lifecycle beyond its `Arc`s: the
/// runtime that created the device decides when it goes away.
#[derive(Clone, Debug)]
pub struct GpuContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    limits: Limits,
    adapter_name: Option<String>,
    shaders: Arc<ShaderCache>,
}

impl GpuContext {
    /// Adopt an externally created device.
    pub fn new(device: Arc<Device>, queue: Arc<Queue>, limits: Limits) -> Self {
        Self {
            device,
            queue,
            limits,
            adapter_name: None,
            shaders: Arc::new(ShaderCache::new()),
        }
    }

    /// Open the default high-performance adapter.
    pub fn request_default() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(async {
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
        })
        .ok_or(GpuError::NoAdapter)?;

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(async {
            adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("stm.backend.device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: limits.clone(),
                    },
                    None,
                )
                .await
        })?;

        let info = adapter.get_info();
        debug!(adapter = %info.name, backend = ?info.backend, "opened wgpu device");
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
            adapter_name: Some(info.name),
            shaders: Arc::new(ShaderCache::new()),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn adapter_name(&self) -> Option<&str> {
        self.adapter_name.as_deref()
    }

    /// Modules compiled on this device. Clones of the context share it.
    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shaders
    }

    /// Block until every submitted command has completed.
    pub fn sync(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Run `f` inside out-of-memory and validation error scopes.
    ///
    /// Errors raised by the device while `f` runs come back as
    /// [`GpuError::OutOfMemory`] or [`GpuError::Validation`] instead of
    /// reaching the uncaptured-error handler.
    pub fn scoped<T>(&self, f: impl FnOnce(&Device) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = f(&self.device);
        let oom = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = oom {
            return Err(GpuError::OutOfMemory(err.to_string()));
        }
        if let Some(err) = validation {
            return Err(GpuError::Validation(err.to_string()));
        }
        Ok(value)
    }
}

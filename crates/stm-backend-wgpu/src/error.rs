// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use stm_tensor::TensorError;
use thiserror::Error;

use crate::util::ShaderLoadError;

pub type Result<T> = std::result::Result<T, GpuError>;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter is available")]
    NoAdapter,
    #[error("failed to open GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    /// Allocation failed or exceeded the adapter's texture limits.
    #[error("device out of memory: {0}")]
    OutOfMemory(String),
    #[error("device validation failed: {0}")]
    Validation(String),
    #[error("failed to read back device image: {0}")]
    Readback(String),
    #[error("image slot width {0} has no texture encoding (RGBA images hold 4 channels)")]
    UnsupportedPacking(usize),
    #[error(transparent)]
    Shader(#[from] ShaderLoadError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl GpuError {
    /// True when no usable device could be acquired.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, GpuError::NoAdapter | GpuError::DeviceRequest(_))
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, GpuError::OutOfMemory(_))
    }
}

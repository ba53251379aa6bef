// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use stm_tensor::{DType, TensorError};
use thiserror::Error;

use crate::executor::DeviceKind;

pub type Result<T> = std::result::Result<T, OpError>;

#[derive(Debug, Error)]
pub enum OpError {
    /// Rank, broadcast or dimension mismatch. Always a caller bug.
    #[error("shape error: {0}")]
    Shape(String),
    #[error("dtype {dtype} is not supported by {context}")]
    UnsupportedDtype { dtype: DType, context: &'static str },
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("device out of memory: {0}")]
    OutOfMemory(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("operator is already bound to the {0} device")]
    AlreadyBound(DeviceKind),
    #[error("operator is not bound to a device")]
    NotBound,
    #[error("invalid operator definition: {0}")]
    InvalidDefinition(String),
    #[error("missing input tensor '{0}'")]
    MissingInput(String),
}

impl OpError {
    /// Failures a CPU fallback policy is allowed to absorb.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, OpError::DeviceUnavailable(_) | OpError::OutOfMemory(_))
    }
}

impl From<TensorError> for OpError {
    fn from(err: TensorError) -> Self {
        match err {
            TensorError::UnsupportedDtype { dtype, context } => {
                OpError::UnsupportedDtype { dtype, context }
            }
            other => OpError::Shape(other.to_string()),
        }
    }
}

#[cfg(feature = "wgpu")]
impl From<stm_backend_wgpu::GpuError> for OpError {
    fn from(err: stm_backend_wgpu::GpuError) -> Self {
        use stm_backend_wgpu::GpuError;
        match err {
            GpuError::Tensor(inner) => inner.into(),
            GpuError::OutOfMemory(msg) => OpError::OutOfMemory(msg),
            err if err.is_device_unavailable() => OpError::DeviceUnavailable(err.to_string()),
            other => OpError::Device(other.to_string()),
        }
    }
}

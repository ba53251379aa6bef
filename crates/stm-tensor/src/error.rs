// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::dtype::DType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TensorError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    /// Rank, dimension or broadcast mismatch.
    #[error("shape error: {0}")]
    Shape(String),
    #[error("data length mismatch: expected {expected} elements, got {got}")]
    DataLength { expected: usize, got: usize },
    #[error("dtype mismatch: descriptor declares {expected}, storage holds {got}")]
    DTypeMismatch { expected: DType, got: DType },
    /// The dtype has no encoding for the requested layout or conversion.
    #[error("dtype {dtype} is not supported by {context}")]
    UnsupportedDtype { dtype: DType, context: &'static str },
}

impl TensorError {
    /// True for every variant that describes a malformed shape or length.
    pub fn is_shape(&self) -> bool {
        matches!(self, TensorError::Shape(_) | TensorError::DataLength { .. })
    }
}

pub(crate) fn shape(msg: impl Into<String>) -> TensorError {
    TensorError::Shape(msg.into())
}

pub(crate) fn unsupported(dtype: DType, context: &'static str) -> TensorError {
    TensorError::UnsupportedDtype { dtype, context }
}
